//! Aureon account ledger.
//!
//! Balances and stakes per address, changed only by three operations:
//!
//! * transfer: moves balance between addresses, authorized by an Ed25519
//!   signature whose key derives the sender address ([`identity`]);
//! * stake / unstake: moves value between an address's balance and stake.
//!
//! [`ledger::LedgerState`] is the pure transition engine,
//! [`ledger::service::Ledger`] serializes mutations and persists each accepted
//! snapshot through a [`store::SnapshotStore`]. The remaining modules are the
//! thin shell the `aureon` binary is built from.

pub mod config;
pub mod contracts;
pub mod identity;
pub mod ledger;
pub mod request;
pub mod store;
pub mod wallet;

pub use identity::{derive_address, verify, Address, MessagePolicy};
pub use ledger::{
    service::{Ledger, ServiceError},
    Amount, LedgerError, LedgerOperation, LedgerState, OperationReceipt,
};
