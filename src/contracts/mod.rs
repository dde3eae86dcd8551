//! Content-addressed storage for uploaded contract bytecode.
//!
//! Uploads are written to `<root>/<sha256-hex>.wasm`. Nothing here runs the
//! code; execution belongs to an external runtime.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

pub const DEFAULT_GAS_LIMIT: u64 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("contract bytecode is empty")]
    EmptyBytecode,
    #[error("contract creator must not be empty")]
    MissingCreator,
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployedContract {
    pub status: String,
    pub contract_hash: String,
    pub creator: String,
    pub gas_limit: u64,
}

pub fn contract_hash(bytecode: &[u8]) -> String {
    hex::encode(Sha256::digest(bytecode))
}

#[derive(Clone, Debug)]
pub struct ContractStore {
    root: PathBuf,
}

impl ContractStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, contract_hash: &str) -> PathBuf {
        self.root.join(format!("{contract_hash}.wasm"))
    }

    pub fn contains(&self, contract_hash: &str) -> bool {
        self.path_for(contract_hash).is_file()
    }

    pub fn deploy(
        &self,
        bytecode: &[u8],
        creator: &str,
        gas_limit: u64,
    ) -> Result<DeployedContract, ContractError> {
        if bytecode.is_empty() {
            return Err(ContractError::EmptyBytecode);
        }
        let creator = creator.trim();
        if creator.is_empty() {
            return Err(ContractError::MissingCreator);
        }

        let hash = contract_hash(bytecode);
        let path = self.path_for(&hash);
        let io_err = |source| ContractError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(io_err)?;
        // Same bytes, same name: a re-upload leaves the existing file alone.
        if !path.is_file() {
            fs::write(&path, bytecode).map_err(io_err)?;
        }
        info!(contract = %hash, creator, gas_limit, bytes = bytecode.len(), "contract uploaded");

        Ok(DeployedContract {
            status: "Contract uploaded".to_string(),
            contract_hash: hash,
            creator: creator.to_string(),
            gas_limit,
        })
    }
}
