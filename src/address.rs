//! Wallet address type: a 20-byte account identifier normalized to a lower-case
//! hex key for equality/hashing and to an EIP-55 checksummed hex string for
//! anything the escrow contract or a signature recovery needs to display.

use sha3::{Digest, Keccak256};
use std::fmt;

pub const ADDRESS_LEN: usize = 20;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress([u8; ADDRESS_LEN]);

impl WalletAddress {
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Derive the address from an uncompressed secp256k1 public key point,
    /// matching the escrow contract's own `address = keccak256(pubkey)[12..]`.
    pub fn from_uncompressed_pubkey(pubkey_xy: &[u8]) -> Result<Self, AddressError> {
        if pubkey_xy.len() != 64 {
            return Err(AddressError::InvalidPublicKey);
        }
        let hash = Keccak256::digest(pubkey_xy);
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&hash[12..]);
        Ok(Self(out))
    }

    /// Parse a `0x`-prefixed (or bare) 40-hex-char address. Checksum casing,
    /// if present, is validated; an all-lower or all-upper input is accepted
    /// without a checksum check (matches common wallet client leniency).
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        if stripped.len() != ADDRESS_LEN * 2 {
            return Err(AddressError::InvalidLength);
        }
        let bytes = hex::decode(stripped).map_err(|_| AddressError::InvalidHex)?;
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&bytes);
        let addr = Self(out);

        let has_mixed_case = stripped.chars().any(|c| c.is_ascii_uppercase())
            && stripped.chars().any(|c| c.is_ascii_lowercase());
        if has_mixed_case && addr.checksummed_hex() != format!("0x{stripped}") {
            return Err(AddressError::ChecksumMismatch);
        }
        Ok(addr)
    }

    /// Lower-case hex key, suitable as an equality/map key.
    pub fn lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// EIP-55 checksummed form: the hash of the lower-case hex string decides,
    /// digit by digit, whether each hex letter is upper- or lower-cased.
    pub fn checksummed_hex(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = Keccak256::digest(lower.as_bytes());
        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, ch) in lower.chars().enumerate() {
            if ch.is_ascii_digit() {
                out.push(ch);
                continue;
            }
            let nibble = if i % 2 == 0 {
                hash[i / 2] >> 4
            } else {
                hash[i / 2] & 0x0f
            };
            if nibble >= 8 {
                out.push(ch.to_ascii_uppercase());
            } else {
                out.push(ch);
            }
        }
        out
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.checksummed_hex())
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({})", self.checksummed_hex())
    }
}

impl serde::Serialize for WalletAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.checksummed_hex())
    }
}

impl<'de> serde::Deserialize<'de> for WalletAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        WalletAddress::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be 40 hex characters")]
    InvalidLength,
    #[error("address contains non-hex characters")]
    InvalidHex,
    #[error("address checksum does not match")]
    ChecksumMismatch,
    #[error("expected a 64-byte uncompressed public key point")]
    InvalidPublicKey,
}
