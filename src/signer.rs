//! Ed25519 signer for service-node bids.
//!
//! Bids returned by `GET /bids` are signed so that clients can later prove,
//! at transfer intake, that the quoted fee came from this node. The canonical
//! message is the plain concatenation of the bid fields in a fixed order (see
//! [`build_bid_message`]); signatures travel as lower-case hex.
//!
//! The key is an Ed25519 private key in PKCS#8 PEM form, optionally encrypted
//! with a passphrase (PBES2).

use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use pkcs8::der::Decode;
use pkcs8::{EncryptedPrivateKeyInfo, SecretDocument};
use std::path::Path;

use crate::amount::Amount;
use crate::chain::Blockchain;

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("unable to read the signer key file {0}: {1}")]
    FileRead(String, #[source] std::io::Error),
    #[error("unable to parse the signer key: {0}")]
    KeyParse(String),
    #[error("unable to decrypt the signer key: {0}")]
    Decrypt(String),
}

/// Holds the service node's Ed25519 key and signs/verifies canonical messages.
pub struct BidSigner {
    key: SigningKey,
}

impl BidSigner {
    /// Loads the key from a PKCS#8 PEM file, decrypting it when a non-empty
    /// password is given.
    pub fn load(pem_path: &Path, password: Option<&str>) -> Result<Self, SignerError> {
        let pem = std::fs::read_to_string(pem_path)
            .map_err(|e| SignerError::FileRead(pem_path.display().to_string(), e))?;
        let key = match password {
            Some(password) if !password.is_empty() => {
                let (_, document) = SecretDocument::from_pem(&pem)
                    .map_err(|e| SignerError::KeyParse(e.to_string()))?;
                let encrypted = EncryptedPrivateKeyInfo::from_der(document.as_bytes())
                    .map_err(|e| SignerError::KeyParse(e.to_string()))?;
                let decrypted = encrypted
                    .decrypt(password)
                    .map_err(|e| SignerError::Decrypt(e.to_string()))?;
                SigningKey::from_pkcs8_der(decrypted.as_bytes())
                    .map_err(|e| SignerError::KeyParse(e.to_string()))?
            }
            _ => SigningKey::from_pkcs8_pem(&pem)
                .map_err(|e| SignerError::KeyParse(e.to_string()))?,
        };
        Ok(Self { key })
    }

    /// Wraps an already-constructed key. Intended for tests.
    pub fn from_signing_key(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Signs a canonical message, returning the signature as lower-case hex.
    pub fn sign_message(&self, message: &str) -> String {
        let signature = self.key.sign(message.as_bytes());
        hex::encode(signature.to_bytes())
    }

    /// Verifies a hex signature over a canonical message. Any malformed
    /// signature verifies as false.
    pub fn verify_message(&self, message: &str, signature_hex: &str) -> bool {
        let Ok(bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        self.key
            .verifying_key()
            .verify(message.as_bytes(), &signature)
            .is_ok()
    }
}

/// Builds a canonical message by concatenating the decimal renderings of the
/// parts with the given separator between them.
pub fn build_message(separator: &str, parts: &[String]) -> String {
    parts.join(separator)
}

/// Canonical bid message: empty separator, fixed field order.
pub fn build_bid_message(
    fee: Amount,
    valid_until: u64,
    source_blockchain: Blockchain,
    destination_blockchain: Blockchain,
    execution_time: u64,
) -> String {
    build_message(
        "",
        &[
            fee.to_string(),
            valid_until.to_string(),
            (source_blockchain as i32).to_string(),
            (destination_blockchain as i32).to_string(),
            execution_time.to_string(),
        ],
    )
}
