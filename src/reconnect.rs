//! Reconnect-proof verification: a disconnected player reclaims their seat
//! by signing a constant message with their wallet key. This has nothing to
//! do with the escrow contract; it only proves the caller controls the
//! private key behind the wallet address they claim.

use crate::address::WalletAddress;
use crate::error::ReconnectError;
use crate::signer::{recover_personal_sign, Signature65, SignerError};

pub const RECONNECT_MESSAGE: &str = "Reconnecting to CoffeeChess";

/// Verify that `signature` over [`RECONNECT_MESSAGE`] recovers to `claimed`.
pub fn verify(claimed: WalletAddress, signature_hex: &str) -> Result<(), ReconnectError> {
    let signature = Signature65::from_hex(signature_hex).map_err(|_| ReconnectError::InvalidSignature)?;
    let recovered = recover_personal_sign(RECONNECT_MESSAGE.as_bytes(), &signature).map_err(|e| {
        match e {
            SignerError::InvalidRecoveryByte
            | SignerError::MalformedSignature
            | SignerError::RecoveryFailed => ReconnectError::InvalidSignature,
            _ => ReconnectError::InvalidSignature,
        }
    })?;

    if recovered == claimed {
        Ok(())
    } else {
        Err(ReconnectError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::VerdictSigner;

    #[test]
    fn valid_reconnect_signature_is_accepted() {
        let signer = VerdictSigner::ephemeral();
        let sig = signer.sign_message(RECONNECT_MESSAGE.as_bytes()).unwrap();
        assert!(verify(signer.address(), &sig.to_hex()).is_ok());
    }

    #[test]
    fn signature_from_a_different_key_is_rejected() {
        let signer = VerdictSigner::ephemeral();
        let impostor = VerdictSigner::ephemeral();
        let sig = impostor.sign_message(RECONNECT_MESSAGE.as_bytes()).unwrap();
        assert_eq!(
            verify(signer.address(), &sig.to_hex()),
            Err(ReconnectError::SignatureMismatch)
        );
    }

    #[test]
    fn malformed_signature_hex_is_rejected() {
        assert_eq!(
            verify(WalletAddress::from_bytes([0u8; 20]), "not-hex"),
            Err(ReconnectError::InvalidSignature)
        );
    }
}
