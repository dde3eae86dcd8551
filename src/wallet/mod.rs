use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signer, SigningKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::identity::{address_of, Address};

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("private key is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("private key must be 32 bytes, got {0}")]
    KeyLength(usize),
}

/// Key material as handed to users: raw Ed25519 bytes in standard base64.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub address: Address,
    pub public_key: String,
    pub private_key: String,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

fn parse_private_key(private_key_b64: &str) -> Result<SigningKey, WalletError> {
    let bytes = general_purpose::STANDARD.decode(private_key_b64.trim())?;
    let secret: [u8; SECRET_KEY_LENGTH] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| WalletError::KeyLength(bytes.len()))?;
    Ok(SigningKey::from_bytes(&secret))
}

impl Wallet {
    pub fn generate() -> Self {
        Self::from_signing_key(&SigningKey::generate(&mut OsRng))
    }

    pub fn import(private_key_b64: &str) -> Result<Self, WalletError> {
        Ok(Self::from_signing_key(&parse_private_key(private_key_b64)?))
    }

    fn from_signing_key(sk: &SigningKey) -> Self {
        let pk = sk.verifying_key();
        Self {
            address: address_of(&pk),
            public_key: general_purpose::STANDARD.encode(pk.as_bytes()),
            private_key: general_purpose::STANDARD.encode(sk.to_bytes()),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<String, WalletError> {
        sign_message(&self.private_key, message)
    }
}

/// Base64 Ed25519 signature of `message` under a base64 private key.
pub fn sign_message(private_key_b64: &str, message: &[u8]) -> Result<String, WalletError> {
    let sk = parse_private_key(private_key_b64)?;
    Ok(general_purpose::STANDARD.encode(sk.sign(message).to_bytes()))
}
