use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::contracts::ContractStore;
use crate::identity::MessagePolicy;
use crate::ledger::service::Ledger;
use crate::store::{JsonFileStore, StoreError};

pub const DEFAULT_STATE_FILE: &str = "state.json";
pub const DEFAULT_CONTRACTS_DIR: &str = "contracts";

/// Where the ledger lives and how it authorizes transfers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    pub state_path: PathBuf,
    pub contracts_dir: PathBuf,
    pub message_policy: MessagePolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_FILE),
            contracts_dir: PathBuf::from(DEFAULT_CONTRACTS_DIR),
            message_policy: MessagePolicy::default(),
        }
    }
}

impl LedgerConfig {
    pub fn snapshot_store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.state_path)
    }

    pub fn contract_store(&self) -> ContractStore {
        ContractStore::new(&self.contracts_dir)
    }

    pub fn open_ledger(&self) -> Result<Ledger<JsonFileStore>, StoreError> {
        Ledger::open(self.snapshot_store(), self.message_policy)
    }
}
