//! Structural validation of incoming JSON payloads.
//!
//! Payloads mirror the wire shape clients send (`from_addr`, `to_addr`, ...,
//! keys and signatures as standard base64). Every field is optional at the
//! serde level so an absent field surfaces as [`RequestError::MissingField`]
//! instead of a generic decode error; business rules are left to the ledger.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::identity::Address;
use crate::ledger::{LedgerOperation, StakeRequest, TransferRequest};

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("malformed field {field}: {reason}")]
    MalformedField { field: &'static str, reason: String },
    #[error("request body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferPayload {
    pub from_addr: Option<String>,
    pub to_addr: Option<String>,
    pub amount: Option<i64>,
    pub public_key: Option<String>,
    pub signature: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StakePayload {
    pub address: Option<String>,
    pub amount: Option<i64>,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, RequestError> {
    value.ok_or(RequestError::MissingField(field))
}

fn address_field(value: String, field: &'static str) -> Result<Address, RequestError> {
    value
        .trim()
        .parse()
        .map_err(|err: crate::identity::AddressParseError| RequestError::MalformedField {
            field,
            reason: err.to_string(),
        })
}

fn base64_field(value: &str, field: &'static str) -> Result<Vec<u8>, RequestError> {
    general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|err| RequestError::MalformedField {
            field,
            reason: err.to_string(),
        })
}

impl TransferPayload {
    /// All six fields are checked for presence before any of them is decoded,
    /// so the first missing field is always the one reported.
    pub fn into_request(self) -> Result<TransferRequest, RequestError> {
        let from = required(self.from_addr, "from_addr")?;
        let to = required(self.to_addr, "to_addr")?;
        let amount = required(self.amount, "amount")?;
        let public_key = required(self.public_key, "public_key")?;
        let signature = required(self.signature, "signature")?;
        let message = required(self.message, "message")?;

        Ok(TransferRequest {
            from: address_field(from, "from_addr")?,
            to: address_field(to, "to_addr")?,
            amount,
            public_key: base64_field(&public_key, "public_key")?,
            signature: base64_field(&signature, "signature")?,
            message: message.into_bytes(),
        })
    }
}

impl StakePayload {
    pub fn into_request(self) -> Result<StakeRequest, RequestError> {
        let address = required(self.address, "address")?;
        let amount = required(self.amount, "amount")?;
        Ok(StakeRequest {
            address: address_field(address, "address")?,
            amount,
        })
    }
}

pub fn parse_transfer(body: &[u8]) -> Result<LedgerOperation, RequestError> {
    let payload: TransferPayload = serde_json::from_slice(body)?;
    Ok(LedgerOperation::Transfer(payload.into_request()?))
}

pub fn parse_stake(body: &[u8]) -> Result<LedgerOperation, RequestError> {
    let payload: StakePayload = serde_json::from_slice(body)?;
    Ok(LedgerOperation::Stake(payload.into_request()?))
}

pub fn parse_unstake(body: &[u8]) -> Result<LedgerOperation, RequestError> {
    let payload: StakePayload = serde_json::from_slice(body)?;
    Ok(LedgerOperation::Unstake(payload.into_request()?))
}
