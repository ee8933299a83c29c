//! Configuration for the CoffeeChess coordinator daemon.
//!
//! Note: some items appear as "dead code" in library checks because they're
//! only used by the binary (main.rs). These include `Config::load_from_file`,
//! `Config::load_or_create`, `Config::save_to_file`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serializing config file: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Get the platform-specific data directory for the coordinator.
pub fn get_data_dir() -> PathBuf {
    if cfg!(windows) {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coffeechess")
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".coffeechess")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub admin: AdminConfig,
    pub escrow: EscrowConfig,
    pub signer: SignerConfig,
    pub room: RoomConfig,
    pub rate_limit: RateLimitConfig,
    pub username: UsernameConfig,
    pub logging: LoggingConfig,
}

/// The player-facing WebSocket listener. This is the only component that
/// touches a transport socket directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub listen_address: String,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_seconds: u64,
}

fn default_heartbeat_interval() -> u64 {
    20
}

/// The operator-facing health/admin surface (`getHealth`, `listOpenRooms`,
/// `getRoomInfo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    pub listen_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Rotating list of JSON-RPC endpoints for the chain hosting the escrow
    /// contract; the verifier fails over across these on transport error.
    pub rpc_endpoints: Vec<String>,
    pub contract_address: String,
    pub chain_id: u64,
    /// Seconds between retry rounds of the whole endpoint rotation, scaled
    /// linearly by attempt number.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Retry rounds attempted before `verify()` gives up on a room.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_poll_interval_seconds() -> u64 {
    3
}

fn default_max_retries() -> u32 {
    15
}

/// The signing key is read from the environment (`COFFEECHESS_SIGNER_KEY`),
/// never stored in the config file — this struct only carries the
/// non-secret parts of the policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Verify the process's own key against the escrow's `trustedSigner()`
    /// at startup; a mismatch is fatal unless `--demo-key` is in play.
    #[serde(default = "default_true")]
    pub verify_trusted_signer_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    #[serde(default = "default_time_budget_seconds")]
    pub default_time_budget_seconds: u64,
    /// How long a draw offer stays open before it's treated as declined.
    #[serde(default = "default_draw_offer_expiry_seconds")]
    pub draw_offer_expiry_seconds: u64,
    /// Grace period after a disconnect before the opponent is awarded a
    /// forfeit win.
    #[serde(default = "default_disconnect_grace_seconds")]
    pub disconnect_grace_seconds: u64,
    /// How long a finished room's actor stays alive (serving snapshots)
    /// before it's garbage-collected.
    #[serde(default = "default_post_game_gc_seconds")]
    pub post_game_gc_seconds: u64,
}

fn default_time_budget_seconds() -> u64 {
    300
}

fn default_draw_offer_expiry_seconds() -> u64 {
    30
}

fn default_disconnect_grace_seconds() -> u64 {
    60
}

fn default_post_game_gc_seconds() -> u64 {
    30
}

/// Per-bucket override of the default rate limit window and request
/// ceiling. Any bucket left out of `overrides` keeps its built-in default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitBucketOverride {
    pub bucket: String,
    pub window_seconds: u64,
    pub max_requests: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub overrides: Vec<RateLimitBucketOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameConfig {
    /// Relative to the data directory unless absolute.
    #[serde(default = "default_usernames_file")]
    pub file_path: String,
}

fn default_usernames_file() -> String {
    "usernames.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub file_path: String,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig {
                listen_address: "0.0.0.0:9001".to_string(),
                heartbeat_interval_seconds: default_heartbeat_interval(),
            },
            admin: AdminConfig {
                listen_address: "127.0.0.1:9002".to_string(),
            },
            escrow: EscrowConfig {
                rpc_endpoints: vec!["http://localhost:8545".to_string()],
                contract_address: "0x0000000000000000000000000000000000000000".to_string(),
                chain_id: 8453,
                poll_interval_seconds: default_poll_interval_seconds(),
                max_retries: default_max_retries(),
            },
            signer: SignerConfig {
                verify_trusted_signer_on_startup: true,
            },
            room: RoomConfig {
                default_time_budget_seconds: default_time_budget_seconds(),
                draw_offer_expiry_seconds: default_draw_offer_expiry_seconds(),
                disconnect_grace_seconds: default_disconnect_grace_seconds(),
                post_game_gc_seconds: default_post_game_gc_seconds(),
            },
            rate_limit: RateLimitConfig { enabled: true, overrides: Vec::new() },
            username: UsernameConfig {
                file_path: default_usernames_file(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
                output: "stdout".to_string(),
                file_path: "./logs/coordinator.log".to_string(),
            },
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn load_or_create(path: &str) -> Result<Self, ConfigError> {
        if fs::metadata(path).is_ok() {
            Self::load_from_file(path)
        } else {
            let config = Config::default();
            config.save_to_file(path)?;
            Ok(config)
        }
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                let _ = fs::create_dir_all(parent);
            }
        }
        fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.gateway.listen_address, config.gateway.listen_address);
    }

    #[test]
    fn load_or_create_writes_a_default_file_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path_str = path.to_str().unwrap();

        let created = Config::load_or_create(path_str).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_from_file(path_str).unwrap();
        assert_eq!(reloaded.escrow.chain_id, created.escrow.chain_id);
    }
}
