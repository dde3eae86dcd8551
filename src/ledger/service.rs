use parking_lot::RwLock;
use tracing::{info, warn};

use crate::identity::{Address, MessagePolicy};
use crate::store::{SnapshotStore, StoreError};

use super::{
    Amount, LedgerError, LedgerOperation, LedgerState, OperationReceipt, StakeRequest,
    TransferRequest, UnstakeRequest,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("rejected: {0}")]
    Rejected(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Single-writer owner of the ledger snapshot.
///
/// Mutations hold the write lock and the store's writer lock across
/// load, apply and save, so no two operations ever interleave, even between
/// `Ledger`s in different processes sharing one snapshot. The in-memory state
/// only advances once the store has accepted the new snapshot. Queries share
/// the read lock and see the state as of the last open or mutation.
pub struct Ledger<S> {
    state: RwLock<LedgerState>,
    store: S,
    policy: MessagePolicy,
}

impl<S: SnapshotStore> Ledger<S> {
    /// Loads the snapshot from `store`. A corrupt snapshot is returned as an
    /// error rather than replaced with an empty ledger.
    pub fn open(store: S, policy: MessagePolicy) -> Result<Self, StoreError> {
        let state = store.load()?;
        info!(
            accounts = state.balances.len(),
            stakers = state.stakes.len(),
            %policy,
            "ledger opened"
        );
        Ok(Self {
            state: RwLock::new(state),
            store,
            policy,
        })
    }

    pub fn policy(&self) -> MessagePolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.state.read().balance_of(address)
    }

    pub fn staked_of(&self, address: &Address) -> Amount {
        self.state.read().staked_of(address)
    }

    pub fn snapshot(&self) -> LedgerState {
        self.state.read().clone()
    }

    pub fn execute(&self, operation: &LedgerOperation) -> Result<OperationReceipt, ServiceError> {
        let kind = operation.kind();
        self.commit(kind, |next| next.apply(operation, self.policy))
            .map(|receipt| {
                info!(kind, ?receipt, "operation applied");
                receipt
            })
    }

    pub fn transfer(&self, request: TransferRequest) -> Result<OperationReceipt, ServiceError> {
        self.execute(&LedgerOperation::Transfer(request))
    }

    pub fn stake(&self, request: StakeRequest) -> Result<OperationReceipt, ServiceError> {
        self.execute(&LedgerOperation::Stake(request))
    }

    pub fn unstake(&self, request: UnstakeRequest) -> Result<OperationReceipt, ServiceError> {
        self.execute(&LedgerOperation::Unstake(request))
    }

    /// Seed `address` with newly minted value. Returns the new balance.
    pub fn fund(&self, address: &Address, amount: Amount) -> Result<Amount, ServiceError> {
        let balance = self.commit("fund", |next| next.credit(address, amount))?;
        info!(%address, amount, balance, "account funded");
        Ok(balance)
    }

    fn commit<T>(
        &self,
        kind: &'static str,
        mutate: impl FnOnce(&mut LedgerState) -> Result<T, LedgerError>,
    ) -> Result<T, ServiceError> {
        let mut state = self.state.write();
        self.store.exclusive(|| -> Result<T, ServiceError> {
            // Another writer may have saved since this ledger last looked.
            *state = self.store.load()?;
            let mut next = state.clone();
            let outcome = mutate(&mut next).map_err(|err| {
                warn!(kind, error = %err, "operation rejected");
                err
            })?;
            self.store.save(&next)?;
            *state = next;
            Ok(outcome)
        })?
    }
}
