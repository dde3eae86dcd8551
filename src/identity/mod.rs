//! Address derivation and transfer authorization.
//!
//! An [`Address`] is `0x` followed by the first 40 lowercase hex characters of
//! `SHA-256(public_key)`, where `public_key` is the raw 32-byte Ed25519 key.
//! Nothing in this module holds state; every function is safe to call from any
//! thread.

use std::{fmt, str::FromStr};

use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use tracing::debug;

pub const ADDRESS_PREFIX: &str = "0x";
pub const ADDRESS_LEN: usize = 20; // 40 hex chars after the prefix

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ADDRESS_PREFIX}{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressParseError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must carry {expected} hex characters, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("address must be lowercase hex")]
    NotLowercaseHex,
}

impl FromStr for Address {
    type Err = AddressParseError;

    /// Only the canonical form produced by [`derive_address`] is accepted, so
    /// two textual addresses are equal iff their derivations are.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or(AddressParseError::MissingPrefix)?;
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(AddressParseError::BadLength {
                expected: ADDRESS_LEN * 2,
                actual: digits.len(),
            });
        }
        if !digits
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(AddressParseError::NotLowercaseHex);
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes).map_err(|_| AddressParseError::NotLowercaseHex)?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        encoded.parse().map_err(D::Error::custom)
    }
}

/// Diagnostic detail behind a failed authorization. Callers outside this crate
/// only ever see a boolean or `Unauthorized`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("public key must be 32 bytes encoding a curve point (got {len} bytes)")]
    MalformedPublicKey { len: usize },
    #[error("signature must be 64 bytes (got {len} bytes)")]
    MalformedSignature { len: usize },
    #[error("signature does not verify under the public key")]
    BadSignature,
    #[error("public key derives {derived}, request claims {claimed}")]
    AddressMismatch { derived: Address, claimed: Address },
    #[error("message does not encode the requested transfer")]
    UnboundMessage,
}

fn parse_public_key(public_key: &[u8]) -> Result<VerifyingKey, IdentityError> {
    let malformed = || IdentityError::MalformedPublicKey {
        len: public_key.len(),
    };
    let bytes: [u8; PUBLIC_KEY_LENGTH] = public_key.try_into().map_err(|_| malformed())?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| malformed())
}

/// Address of an already-parsed key.
pub fn address_of(key: &VerifyingKey) -> Address {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; ADDRESS_LEN];
    bytes.copy_from_slice(&digest[..ADDRESS_LEN]);
    Address(bytes)
}

/// Derive the canonical address of an Ed25519 public key.
pub fn derive_address(public_key: &[u8]) -> Result<Address, IdentityError> {
    parse_public_key(public_key).map(|key| address_of(&key))
}

/// Strict Ed25519 verification that reports why a signature was refused.
pub fn verify_detailed(
    public_key: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), IdentityError> {
    let key = parse_public_key(public_key)?;
    let signature = Signature::from_slice(signature).map_err(|_| {
        IdentityError::MalformedSignature {
            len: signature.len(),
        }
    })?;
    key.verify_strict(message, &signature)
        .map_err(|_| IdentityError::BadSignature)
}

/// `true` iff `signature` is a valid signature over exactly `message`.
pub fn verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    match verify_detailed(public_key, signature, message) {
        Ok(()) => true,
        Err(err) => {
            debug!(error = %err, "signature rejected");
            false
        }
    }
}

/// Both halves of the transfer authorization protocol: the signature must
/// verify and the signing key must derive the claimed sender.
pub fn authorize(
    from: &Address,
    public_key: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), IdentityError> {
    verify_detailed(public_key, signature, message)?;
    let derived = derive_address(public_key)?;
    if derived != *from {
        return Err(IdentityError::AddressMismatch {
            derived,
            claimed: *from,
        });
    }
    Ok(())
}

/// The message a wallet signs to authorize moving `amount` to `to`.
pub fn transfer_message(amount: u64, to: &Address) -> String {
    format!("transfer {amount} to {to}")
}

/// How strictly a signed transfer message is tied to the request it authorizes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePolicy {
    /// The message must equal [`transfer_message`] for the requested amount and
    /// recipient, so a signature cannot be replayed for a different transfer.
    #[default]
    Canonical,
    /// Any message signed by the sender is accepted.
    Verbatim,
}

impl MessagePolicy {
    pub fn check(&self, message: &[u8], amount: u64, to: &Address) -> Result<(), IdentityError> {
        match self {
            MessagePolicy::Verbatim => Ok(()),
            MessagePolicy::Canonical => {
                if message == transfer_message(amount, to).as_bytes() {
                    Ok(())
                } else {
                    Err(IdentityError::UnboundMessage)
                }
            }
        }
    }
}

impl fmt::Display for MessagePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessagePolicy::Canonical => "canonical",
            MessagePolicy::Verbatim => "verbatim",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown message policy {0:?} (expected canonical or verbatim)")]
pub struct MessagePolicyParseError(pub String);

impl FromStr for MessagePolicy {
    type Err = MessagePolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "canonical" => Ok(MessagePolicy::Canonical),
            "verbatim" => Ok(MessagePolicy::Verbatim),
            _ => Err(MessagePolicyParseError(s.to_string())),
        }
    }
}
