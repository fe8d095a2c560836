//! Operator signing keys.
//!
//! Both backends sign with secp256k1. Key material is parsed from hex into a
//! zeroizing buffer and never leaves this module except as signatures.

use std::fmt;

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::error::AdapterError;

/// Length of a recoverable signature: r (32) || s (32) || v (1).
pub const SIGNATURE_LEN: usize = 65;

/// A secp256k1 signing key held by the orchestrator context.
#[derive(Clone)]
pub struct OperatorKey {
    inner: SigningKey,
}

impl OperatorKey {
    /// Parse a 32-byte hex key, with or without a `0x` prefix.
    pub fn from_hex(text: &str) -> Result<Self, AdapterError> {
        let trimmed = text.trim();
        let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = Zeroizing::new(
            hex::decode(hex_part)
                .map_err(|e| AdapterError::Signing(format!("key is not hex: {}", e)))?,
        );
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AdapterError> {
        if bytes.len() != 32 {
            return Err(AdapterError::Signing(format!(
                "key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let inner = SigningKey::from_slice(bytes)
            .map_err(|e| AdapterError::Signing(format!("invalid secp256k1 key: {}", e)))?;
        Ok(Self { inner })
    }

    /// The 20-byte account identifier shared by both backends:
    /// the last 20 bytes of keccak256 over the uncompressed public key.
    pub fn address_bytes(&self) -> [u8; 20] {
        let public = k256::PublicKey::from(self.inner.verifying_key());
        let point = public.to_encoded_point(false);
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        out
    }

    /// Sign a 32-byte digest, returning `r || s || v`.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN], AdapterError> {
        let (signature, recovery_id) = self
            .inner
            .sign_prehash_recoverable(digest)
            .map_err(|e| AdapterError::Signing(e.to_string()))?;

        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&signature.to_bytes());
        out[64] = recovery_id.to_byte();
        Ok(out)
    }
}

impl fmt::Debug for OperatorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperatorKey(0x{})", hex::encode(self.address_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Well-known test vector (private key 1).
    const KEY_ONE: &str = "0x0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn test_address_derivation() {
        let key = OperatorKey::from_hex(KEY_ONE).unwrap();
        assert_eq!(
            hex::encode(key.address_bytes()),
            "7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(OperatorKey::from_hex("zz").is_err());
        assert!(OperatorKey::from_hex("0x01").is_err());
        assert!(OperatorKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_signature_shape() {
        let key = OperatorKey::from_hex(KEY_ONE).unwrap();
        let sig = key.sign_digest(&[7u8; 32]).unwrap();
        assert!(sig[64] <= 3);
        // RFC 6979 signing is deterministic.
        assert_eq!(sig, key.sign_digest(&[7u8; 32]).unwrap());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = OperatorKey::from_hex(KEY_ONE).unwrap();
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("7e5f4552"));
        assert!(!rendered.contains("0000000000000001"));
    }
}
