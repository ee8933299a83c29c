//! Fixed-window rate limiting for gateway messages.
//!
//! Limits are keyed by `(subject, bucket)` where `subject` is a wallet
//! address or connection identifier and `bucket` names the action class
//! (moves, chat, username changes, everything else). Each bucket has its
//! own window and ceiling; exceeding a ceiling rejects the message without
//! resetting the window early.

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Moves,
    Chat,
    SetUsername,
    General,
}

impl Bucket {
    fn name(self) -> &'static str {
        match self {
            Bucket::Moves => "moves",
            Bucket::Chat => "chat",
            Bucket::SetUsername => "set_username",
            Bucket::General => "general",
        }
    }

    fn default_window_and_max(self) -> (Duration, u32) {
        match self {
            Bucket::Moves => (Duration::from_secs(10), 30),
            Bucket::Chat => (Duration::from_secs(60), 20),
            Bucket::SetUsername => (Duration::from_secs(60), 5),
            Bucket::General => (Duration::from_secs(60), 30),
        }
    }

    fn all() -> [Bucket; 4] {
        [Bucket::Moves, Bucket::Chat, Bucket::SetUsername, Bucket::General]
    }
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct RateLimiter {
    enabled: bool,
    limits: HashMap<Bucket, (Duration, u32)>,
    counters: HashMap<(String, Bucket), (Instant, u32)>,
    last_sweep: Instant,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut limits: HashMap<Bucket, (Duration, u32)> =
            Bucket::all().into_iter().map(|b| (b, b.default_window_and_max())).collect();
        for over in &config.overrides {
            if let Some(bucket) = Bucket::all().into_iter().find(|b| b.name() == over.bucket) {
                limits.insert(bucket, (Duration::from_secs(over.window_seconds), over.max_requests));
            }
        }
        Self {
            enabled: config.enabled,
            limits,
            counters: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    fn window_and_max(&self, bucket: Bucket) -> (Duration, u32) {
        self.limits.get(&bucket).copied().unwrap_or_else(|| bucket.default_window_and_max())
    }

    /// Returns `true` if `subject` may perform another action in `bucket`
    /// right now, recording the attempt either way. Always `true` when rate
    /// limiting is disabled in config.
    pub fn check(&mut self, subject: &str, bucket: Bucket) -> bool {
        if !self.enabled {
            return true;
        }

        let (window, max) = self.window_and_max(bucket);
        let now = Instant::now();
        self.sweep(now);

        let key = (subject.to_string(), bucket);
        let (window_start, count) = self.counters.entry(key).or_insert((now, 0));

        if now.duration_since(*window_start) > window {
            *window_start = now;
            *count = 0;
        }

        if *count >= max {
            false
        } else {
            *count += 1;
            true
        }
    }

    fn sweep(&mut self, now: Instant) {
        if now.duration_since(self.last_sweep) < SWEEP_INTERVAL {
            return;
        }
        let limits = &self.limits;
        self.counters
            .retain(|(_, bucket), (window_start, _)| {
                let (window, _) = limits.get(bucket).copied().unwrap_or_else(|| bucket.default_window_and_max());
                now.duration_since(*window_start) < window * 10
            });
        self.last_sweep = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RateLimitConfig {
        RateLimitConfig { enabled: true, overrides: Vec::new() }
    }

    #[test]
    fn allows_up_to_the_bucket_ceiling() {
        let mut limiter = RateLimiter::new(&test_config());
        for _ in 0..30 {
            assert!(limiter.check("0xabc", Bucket::Moves));
        }
        assert!(!limiter.check("0xabc", Bucket::Moves));
    }

    #[test]
    fn buckets_are_independent_per_subject() {
        let mut limiter = RateLimiter::new(&test_config());
        for _ in 0..5 {
            assert!(limiter.check("0xabc", Bucket::SetUsername));
        }
        assert!(!limiter.check("0xabc", Bucket::SetUsername));
        assert!(limiter.check("0xdef", Bucket::SetUsername));
    }

    #[test]
    fn buckets_are_independent_per_action_class() {
        let mut limiter = RateLimiter::new(&test_config());
        for _ in 0..20 {
            assert!(limiter.check("0xabc", Bucket::Chat));
        }
        assert!(!limiter.check("0xabc", Bucket::Chat));
        assert!(limiter.check("0xabc", Bucket::General));
    }

    #[test]
    fn disabled_rate_limiting_never_rejects() {
        let config = RateLimitConfig { enabled: false, overrides: Vec::new() };
        let mut limiter = RateLimiter::new(&config);
        for _ in 0..100 {
            assert!(limiter.check("0xabc", Bucket::SetUsername));
        }
    }

    #[test]
    fn a_bucket_override_replaces_the_built_in_ceiling() {
        let config = RateLimitConfig {
            enabled: true,
            overrides: vec![crate::config::RateLimitBucketOverride {
                bucket: "set_username".to_string(),
                window_seconds: 60,
                max_requests: 1,
            }],
        };
        let mut limiter = RateLimiter::new(&config);
        assert!(limiter.check("0xabc", Bucket::SetUsername));
        assert!(!limiter.check("0xabc", Bucket::SetUsername));
    }
}
