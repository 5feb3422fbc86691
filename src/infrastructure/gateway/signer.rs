use crate::error::PaymentError;
use ed25519_dalek::{Signer, SigningKey};
use std::fmt;

/// Header carrying the hex signature of a state-changing request body.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Signs request bodies with the platform's ed25519 key.
pub struct RequestSigner {
    key: SigningKey,
}

impl RequestSigner {
    pub fn from_bytes(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }

    /// Parses a 32-byte seed given as 64 hex characters.
    pub fn from_hex(seed_hex: &str) -> Result<Self, PaymentError> {
        let bytes = hex::decode(seed_hex.trim())
            .map_err(|e| PaymentError::Config(format!("signing key is not hex: {}", e)))?;
        let seed: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            PaymentError::Config(format!(
                "signing key must be 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(seed))
    }

    /// Hex-encoded signature over the exact body bytes.
    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(self.key.sign(body).to_bytes())
    }

    /// Hex-encoded public key, shared with the gateway out of band.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }
}

impl fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestSigner({})", self.public_key_hex())
    }
}
