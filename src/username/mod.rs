//! Wallet → handle registry. One handle per wallet, set once, unique
//! case-insensitively across all wallets. Persisted as a flat JSON object
//! keyed by lower-case wallet address, rewritten in full on every mutation
//! — the file is small (one entry per player who ever set a handle) so this
//! is simpler than a journal and trivially crash-safe via a temp-file swap.

use crate::address::WalletAddress;
use crate::error::UsernameError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const MIN_LEN: usize = 3;
const MAX_LEN: usize = 15;

fn is_valid_format(handle: &str) -> bool {
    let len = handle.chars().count();
    (MIN_LEN..=MAX_LEN).contains(&len)
        && handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub struct UsernameRegistry {
    path: PathBuf,
    // Keyed by lower-case wallet hex; value preserves the caller's casing.
    handles: RwLock<HashMap<String, String>>,
}

impl UsernameRegistry {
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let path = path.as_ref().to_path_buf();
        let handles = if path.exists() {
            let contents = tokio::fs::read_to_string(&path).await?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            handles: RwLock::new(handles),
        })
    }

    pub async fn lookup(&self, wallet: WalletAddress) -> Option<String> {
        self.handles.read().await.get(&wallet.lower_hex()).cloned()
    }

    pub async fn is_taken(&self, handle: &str) -> bool {
        let lower = handle.to_lowercase();
        self.handles.read().await.values().any(|h| h.to_lowercase() == lower)
    }

    /// Sets `wallet`'s handle to `handle`, failing if the wallet already has
    /// one, the format is invalid, or the handle is taken by another wallet.
    pub async fn set(&self, wallet: WalletAddress, handle: &str) -> Result<(), UsernameError> {
        if !is_valid_format(handle) {
            return Err(UsernameError::InvalidFormat);
        }

        let mut handles = self.handles.write().await;
        let key = wallet.lower_hex();
        if handles.contains_key(&key) {
            return Err(UsernameError::AlreadyRegistered);
        }
        let lower = handle.to_lowercase();
        if handles.values().any(|h| h.to_lowercase() == lower) {
            return Err(UsernameError::Taken);
        }

        handles.insert(key, handle.to_string());
        self.persist(&handles).await.map_err(|_| UsernameError::Taken)?;
        Ok(())
    }

    async fn persist(&self, handles: &HashMap<String, String>) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(handles)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(byte: u8) -> WalletAddress {
        WalletAddress::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn first_set_succeeds_and_is_visible_to_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UsernameRegistry::load_or_create(dir.path().join("usernames.json"))
            .await
            .unwrap();
        registry.set(wallet(1), "Alice_01").await.unwrap();
        assert_eq!(registry.lookup(wallet(1)).await.as_deref(), Some("Alice_01"));
    }

    #[tokio::test]
    async fn second_set_for_same_wallet_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UsernameRegistry::load_or_create(dir.path().join("usernames.json"))
            .await
            .unwrap();
        registry.set(wallet(1), "alice").await.unwrap();
        assert_eq!(
            registry.set(wallet(1), "alice2").await,
            Err(UsernameError::AlreadyRegistered)
        );
    }

    #[tokio::test]
    async fn handles_are_unique_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UsernameRegistry::load_or_create(dir.path().join("usernames.json"))
            .await
            .unwrap();
        registry.set(wallet(1), "Alice").await.unwrap();
        assert_eq!(registry.set(wallet(2), "ALICE").await, Err(UsernameError::Taken));
    }

    #[tokio::test]
    async fn rejects_invalid_formats() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UsernameRegistry::load_or_create(dir.path().join("usernames.json"))
            .await
            .unwrap();
        assert_eq!(registry.set(wallet(1), "ab").await, Err(UsernameError::InvalidFormat));
        assert_eq!(
            registry.set(wallet(1), "has spaces").await,
            Err(UsernameError::InvalidFormat)
        );
        assert_eq!(
            registry.set(wallet(1), "way-too-long-for-a-handle").await,
            Err(UsernameError::InvalidFormat)
        );
    }

    #[tokio::test]
    async fn persists_across_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usernames.json");
        {
            let registry = UsernameRegistry::load_or_create(&path).await.unwrap();
            registry.set(wallet(1), "alice").await.unwrap();
        }
        let reloaded = UsernameRegistry::load_or_create(&path).await.unwrap();
        assert_eq!(reloaded.lookup(wallet(1)).await.as_deref(), Some("alice"));
    }
}
