//! Verdict signing: deterministic message-hash construction and ECDSA
//! signing for the `GAME_WIN` / `GAME_DRAW` payloads the escrow contract
//! recovers against its configured trusted signer.
//!
//! All integers and addresses are packed big-endian with no separators,
//! matching the escrow's packed-encoding convention, then wrapped in the
//! `"\x19Ethereum Signed Message:\n<len>"` envelope before signing — the
//! same envelope a wallet's `personal_sign` applies, which is also how
//! reconnect-proof signatures (`reconnect::verify`) are produced and
//! checked.

use crate::address::WalletAddress;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use zeroize::Zeroize;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signer private key must be 32 bytes of hex")]
    InvalidKeyLength,
    #[error("signer private key is not valid hex: {0}")]
    InvalidKeyHex(#[from] hex::FromHexError),
    #[error("invalid secp256k1 scalar for private key")]
    InvalidKey,
    #[error("signing operation failed")]
    SigningFailed,
    #[error("signature must be 65 bytes (r || s || v)")]
    InvalidSignatureLength,
    #[error("malformed r/s component in signature")]
    MalformedSignature,
    #[error("signature recovery byte must be 27, 28, 0, or 1")]
    InvalidRecoveryByte,
    #[error("signature did not recover to a valid public key")]
    RecoveryFailed,
    #[error(
        "configured trusted signer {expected} does not match this process's signing key ({actual})"
    )]
    TrustedSignerMismatch {
        expected: WalletAddress,
        actual: WalletAddress,
    },
}

/// A 65-byte `r || s || v` secp256k1 signature in the convention the escrow
/// contract's `ecrecover`-based verification expects (`v` is 27 or 28).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature65(pub [u8; 65]);

impl Signature65 {
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(s: &str) -> Result<Self, SignerError> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped)?;
        if bytes.len() != 65 {
            return Err(SignerError::InvalidSignatureLength);
        }
        let mut out = [0u8; 65];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl serde::Serialize for Signature65 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Signature65 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature65({})", self.to_hex())
    }
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    buf
}

/// Apply the `"\x19Ethereum Signed Message:\n<len>"` personal-message
/// envelope and hash the result, matching what an `ecrecover`-based
/// contract (or a wallet's `personal_sign`) computes.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut buf = Vec::with_capacity(prefix.len() + message.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(message);
    keccak256(&buf)
}

fn u256_be(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

fn encode_verdict_payload(
    prefix: &'static str,
    game_id: u64,
    claimant: &WalletAddress,
    chain_id: u64,
    contract: &WalletAddress,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(prefix.len() + 32 + 20 + 32 + 20);
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(&u256_be(game_id));
    buf.extend_from_slice(claimant.as_bytes());
    buf.extend_from_slice(&u256_be(chain_id));
    buf.extend_from_slice(contract.as_bytes());
    buf
}

fn public_key_to_address(key: &VerifyingKey) -> WalletAddress {
    let point = key.to_encoded_point(false);
    // Drop the leading 0x04 uncompressed-point tag before hashing.
    WalletAddress::from_uncompressed_pubkey(&point.as_bytes()[1..])
        .expect("encoded point is always 64 bytes")
}

pub struct VerdictSigner {
    signing_key: SigningKey,
    address: WalletAddress,
}

impl VerdictSigner {
    pub fn from_hex_key(hex_key: &str) -> Result<Self, SignerError> {
        let stripped = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let mut bytes = hex::decode(stripped)?;
        if bytes.len() != 32 {
            return Err(SignerError::InvalidKeyLength);
        }
        let mut key_bytes = [0u8; 32];
        key_bytes.copy_from_slice(&bytes);
        bytes.zeroize();

        let signing_key =
            SigningKey::from_bytes((&key_bytes).into()).map_err(|_| SignerError::InvalidKey)?;
        key_bytes.zeroize();
        let address = public_key_to_address(&VerifyingKey::from(&signing_key));

        Ok(Self {
            signing_key,
            address,
        })
    }

    /// Generate an ephemeral key. Only ever used for `--demo-key` local runs;
    /// the resulting signatures are worthless to any real escrow deployment.
    pub fn ephemeral() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let address = public_key_to_address(&VerifyingKey::from(&signing_key));
        Self {
            signing_key,
            address,
        }
    }

    pub fn address(&self) -> WalletAddress {
        self.address
    }

    /// Startup self-check against the escrow contract's `trustedSigner()`.
    pub fn assert_matches_trusted_signer(
        &self,
        trusted: WalletAddress,
    ) -> Result<(), SignerError> {
        if self.address == trusted {
            Ok(())
        } else {
            Err(SignerError::TrustedSignerMismatch {
                expected: trusted,
                actual: self.address,
            })
        }
    }

    fn sign_payload(&self, payload: &[u8]) -> Result<Signature65, SignerError> {
        let digest = personal_message_hash(&keccak256(payload));
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|_| SignerError::SigningFailed)?;

        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(Signature65(out))
    }

    /// Sign an arbitrary `personal_sign`-style message. Verdict signatures go
    /// through [`Self::sign_win`]/[`Self::sign_draw`]; reconnect proofs are
    /// produced by the wallet client itself against this same envelope, so
    /// this helper only exists to let tests act as that client.
    #[cfg(test)]
    pub(crate) fn sign_message(&self, message: &[u8]) -> Result<Signature65, SignerError> {
        let digest = personal_message_hash(message);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|_| SignerError::SigningFailed)?;
        let mut out = [0u8; 65];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = 27 + recovery_id.to_byte();
        Ok(Signature65(out))
    }

    pub fn sign_win(
        &self,
        game_id: u64,
        winner: &WalletAddress,
        chain_id: u64,
        contract: &WalletAddress,
    ) -> Result<Signature65, SignerError> {
        let payload = encode_verdict_payload("GAME_WIN", game_id, winner, chain_id, contract);
        self.sign_payload(&payload)
    }

    pub fn sign_draw(
        &self,
        game_id: u64,
        claimant: &WalletAddress,
        chain_id: u64,
        contract: &WalletAddress,
    ) -> Result<Signature65, SignerError> {
        let payload = encode_verdict_payload("GAME_DRAW", game_id, claimant, chain_id, contract);
        self.sign_payload(&payload)
    }
}

/// Recover the signing address from an arbitrary `message` and its
/// `personal_sign`-style signature. Used both to authenticate reconnect
/// proofs and, in tests, to assert verdict signatures recover correctly.
pub fn recover_personal_sign(message: &[u8], signature: &Signature65) -> Result<WalletAddress, SignerError> {
    let digest = personal_message_hash(message);
    recover_prehash(&digest, signature)
}

fn recover_prehash(digest: &[u8; 32], signature: &Signature65) -> Result<WalletAddress, SignerError> {
    let bytes = &signature.0;
    let v = bytes[64];
    let recovery_byte = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        _ => return Err(SignerError::InvalidRecoveryByte),
    };
    let recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or(SignerError::InvalidRecoveryByte)?;
    let sig =
        EcdsaSignature::from_slice(&bytes[..64]).map_err(|_| SignerError::MalformedSignature)?;

    let recovered = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| SignerError::RecoveryFailed)?;

    // Defense in depth: confirm the recovered key actually verifies the
    // signature against the prehash before trusting the derived address.
    recovered
        .verify_prehash(digest, &sig)
        .map_err(|_| SignerError::RecoveryFailed)?;

    Ok(public_key_to_address(&recovered))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_contract() -> WalletAddress {
        WalletAddress::from_bytes([0x42; 20])
    }

    #[test]
    fn win_signature_recovers_to_signer_address() {
        let signer = VerdictSigner::ephemeral();
        let winner = WalletAddress::from_bytes([0x01; 20]);
        let sig = signer.sign_win(1, &winner, 8453, &demo_contract()).unwrap();

        let payload = encode_verdict_payload("GAME_WIN", 1, &winner, 8453, &demo_contract());
        let digest = personal_message_hash(&keccak256(&payload));
        let recovered = recover_prehash(&digest, &sig).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn changing_chain_id_changes_the_signature() {
        let signer = VerdictSigner::ephemeral();
        let winner = WalletAddress::from_bytes([0x01; 20]);
        let sig_a = signer.sign_win(1, &winner, 1, &demo_contract()).unwrap();
        let sig_b = signer.sign_win(1, &winner, 2, &demo_contract()).unwrap();
        assert_ne!(sig_a.to_hex(), sig_b.to_hex());
    }

    #[test]
    fn changing_contract_address_changes_the_signature() {
        let signer = VerdictSigner::ephemeral();
        let winner = WalletAddress::from_bytes([0x01; 20]);
        let other_contract = WalletAddress::from_bytes([0x99; 20]);
        let sig_a = signer.sign_win(1, &winner, 1, &demo_contract()).unwrap();
        let sig_b = signer.sign_win(1, &winner, 1, &other_contract).unwrap();
        assert_ne!(sig_a.to_hex(), sig_b.to_hex());
    }

    #[test]
    fn draw_signatures_differ_only_by_claimant() {
        let signer = VerdictSigner::ephemeral();
        let white = WalletAddress::from_bytes([0x01; 20]);
        let black = WalletAddress::from_bytes([0x02; 20]);
        let sig_white = signer.sign_draw(7, &white, 1, &demo_contract()).unwrap();
        let sig_black = signer.sign_draw(7, &black, 1, &demo_contract()).unwrap();
        assert_ne!(sig_white.to_hex(), sig_black.to_hex());

        let payload_white = encode_verdict_payload("GAME_DRAW", 7, &white, 1, &demo_contract());
        let payload_black = encode_verdict_payload("GAME_DRAW", 7, &black, 1, &demo_contract());
        assert_eq!(payload_white.len(), payload_black.len());
    }

    #[test]
    fn arbitrary_message_signature_recovers_to_signer() {
        let signer = VerdictSigner::ephemeral();
        let message = b"Reconnecting to CoffeeChess";
        let sig = signer.sign_message(message).unwrap();
        let recovered = recover_personal_sign(message, &sig).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn trusted_signer_mismatch_is_reported() {
        let signer = VerdictSigner::ephemeral();
        let other = WalletAddress::from_bytes([0xee; 20]);
        assert!(signer.assert_matches_trusted_signer(other).is_err());
        assert!(signer.assert_matches_trusted_signer(signer.address()).is_ok());
    }
}
