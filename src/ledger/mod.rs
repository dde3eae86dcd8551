use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::identity::{self, Address, MessagePolicy};

pub mod service;

pub type Amount = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount must be a positive integer, got {amount}")]
    InvalidAmount { amount: i64 },
    #[error("transfer is not authorized")]
    Unauthorized,
    #[error("insufficient balance in {address}: available {available}, requested {requested}")]
    InsufficientBalance {
        address: Address,
        available: Amount,
        requested: Amount,
    },
    #[error("insufficient stake for {address}: staked {staked}, requested {requested}")]
    InsufficientStake {
        address: Address,
        staked: Amount,
        requested: Amount,
    },
    #[error("crediting {amount} to {address} would overflow")]
    BalanceOverflow { address: Address, amount: Amount },
}

#[derive(Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    pub amount: i64,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub message: Vec<u8>,
}

impl std::fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRequest")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("amount", &self.amount)
            .field("public_key", &hex::encode(&self.public_key))
            .field("signature", &hex::encode(&self.signature))
            .field("message", &String::from_utf8_lossy(&self.message))
            .finish()
    }
}

/// Stake and unstake carry the same fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeRequest {
    pub address: Address,
    pub amount: i64,
}

pub type UnstakeRequest = StakeRequest;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerOperation {
    Transfer(TransferRequest),
    Stake(StakeRequest),
    Unstake(UnstakeRequest),
}

impl LedgerOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerOperation::Transfer(_) => "transfer",
            LedgerOperation::Stake(_) => "stake",
            LedgerOperation::Unstake(_) => "unstake",
        }
    }
}

/// Post-state of every address an operation touched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationReceipt {
    Transfer {
        #[serde(rename = "from_addr")]
        from: Address,
        #[serde(rename = "to_addr")]
        to: Address,
        amount: Amount,
        from_balance: Amount,
        to_balance: Amount,
    },
    Stake {
        address: Address,
        amount: Amount,
        balance: Amount,
        staked: Amount,
    },
    Unstake {
        address: Address,
        amount: Amount,
        balance: Amount,
        staked: Amount,
    },
}

/// The whole ledger: two sparse columns keyed by address. A missing entry
/// reads as zero.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerState {
    #[serde(default)]
    pub balances: BTreeMap<Address, Amount>,
    #[serde(default)]
    pub stakes: BTreeMap<Address, Amount>,
}

fn positive_amount(amount: i64) -> Result<Amount, LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount { amount });
    }
    Ok(amount as Amount)
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, address: &Address) -> Amount {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn staked_of(&self, address: &Address) -> Amount {
        self.stakes.get(address).copied().unwrap_or(0)
    }

    /// Sum of every balance and stake. Widened so a hostile snapshot cannot
    /// overflow the accounting itself.
    pub fn total_supply(&self) -> u128 {
        self.balances
            .values()
            .chain(self.stakes.values())
            .map(|v| *v as u128)
            .sum()
    }

    /// Mint `amount` into `address`'s balance. This is the only way value
    /// enters the ledger and is not reachable through [`LedgerOperation`].
    pub fn credit(&mut self, address: &Address, amount: Amount) -> Result<Amount, LedgerError> {
        let balance = self
            .balance_of(address)
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow {
                address: *address,
                amount,
            })?;
        self.balances.insert(*address, balance);
        Ok(balance)
    }

    pub fn apply(
        &mut self,
        operation: &LedgerOperation,
        policy: MessagePolicy,
    ) -> Result<OperationReceipt, LedgerError> {
        match operation {
            LedgerOperation::Transfer(request) => self.transfer(request, policy),
            LedgerOperation::Stake(request) => self.stake(request),
            LedgerOperation::Unstake(request) => self.unstake(request),
        }
    }

    pub fn transfer(
        &mut self,
        request: &TransferRequest,
        policy: MessagePolicy,
    ) -> Result<OperationReceipt, LedgerError> {
        let amount = positive_amount(request.amount)?;
        authorize_transfer(request, amount, policy)?;

        let from = request.from;
        let to = request.to;
        let available = self.balance_of(&from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                address: from,
                available,
                requested: amount,
            });
        }
        if from == to {
            // Net zero, but the sender still gets an explicit entry.
            self.balances.insert(from, available);
        } else {
            let credited = self
                .balance_of(&to)
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow {
                    address: to,
                    amount,
                })?;
            self.balances.insert(from, available - amount);
            self.balances.insert(to, credited);
        }

        Ok(OperationReceipt::Transfer {
            from,
            to,
            amount,
            from_balance: self.balance_of(&from),
            to_balance: self.balance_of(&to),
        })
    }

    pub fn stake(&mut self, request: &StakeRequest) -> Result<OperationReceipt, LedgerError> {
        let amount = positive_amount(request.amount)?;
        let address = request.address;
        let balance = self.balance_of(&address);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                address,
                available: balance,
                requested: amount,
            });
        }
        let staked = self
            .staked_of(&address)
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { address, amount })?;
        self.balances.insert(address, balance - amount);
        self.stakes.insert(address, staked);

        Ok(OperationReceipt::Stake {
            address,
            amount,
            balance: balance - amount,
            staked,
        })
    }

    pub fn unstake(&mut self, request: &UnstakeRequest) -> Result<OperationReceipt, LedgerError> {
        let amount = positive_amount(request.amount)?;
        let address = request.address;
        let staked = self.staked_of(&address);
        if staked < amount {
            return Err(LedgerError::InsufficientStake {
                address,
                staked,
                requested: amount,
            });
        }
        let balance = self
            .balance_of(&address)
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { address, amount })?;
        self.stakes.insert(address, staked - amount);
        self.balances.insert(address, balance);

        Ok(OperationReceipt::Unstake {
            address,
            amount,
            balance,
            staked: staked - amount,
        })
    }
}

/// Every failure collapses into `Unauthorized`; the detail only reaches the
/// debug log.
fn authorize_transfer(
    request: &TransferRequest,
    amount: Amount,
    policy: MessagePolicy,
) -> Result<(), LedgerError> {
    identity::authorize(
        &request.from,
        &request.public_key,
        &request.signature,
        &request.message,
    )
    .and_then(|()| policy.check(&request.message, amount, &request.to))
    .map_err(|err| {
        debug!(from = %request.from, error = %err, "transfer authorization failed");
        LedgerError::Unauthorized
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use ed25519_dalek::{Signer, SigningKey};
    use proptest::prelude::*;
    use rand::rngs::OsRng;

    use crate::identity::{derive_address, transfer_message};

    struct Account {
        key: SigningKey,
        address: Address,
    }

    impl Account {
        fn random() -> Self {
            Self::from_key(SigningKey::generate(&mut OsRng))
        }

        fn from_seed(seed: u8) -> Self {
            Self::from_key(SigningKey::from_bytes(&[seed; 32]))
        }

        fn from_key(key: SigningKey) -> Self {
            let address = derive_address(key.verifying_key().as_bytes()).unwrap();
            Self { key, address }
        }

        fn transfer_signed(&self, to: &Address, amount: i64, message: &str) -> TransferRequest {
            TransferRequest {
                from: self.address,
                to: *to,
                amount,
                public_key: self.key.verifying_key().to_bytes().to_vec(),
                signature: self.key.sign(message.as_bytes()).to_bytes().to_vec(),
                message: message.as_bytes().to_vec(),
            }
        }

        fn transfer(&self, to: &Address, amount: i64) -> TransferRequest {
            let message = transfer_message(amount.max(0) as u64, to);
            self.transfer_signed(to, amount, &message)
        }
    }

    fn funded(account: &Address, amount: Amount) -> LedgerState {
        let mut ledger = LedgerState::new();
        ledger.credit(account, amount).unwrap();
        ledger
    }

    fn stake_req(address: Address, amount: i64) -> StakeRequest {
        StakeRequest { address, amount }
    }

    #[test]
    fn stake_then_unstake_moves_value_between_columns() {
        let a = Account::random();
        let mut ledger = funded(&a.address, 1_000);

        let receipt = ledger.stake(&stake_req(a.address, 300)).unwrap();
        assert_eq!(
            receipt,
            OperationReceipt::Stake {
                address: a.address,
                amount: 300,
                balance: 700,
                staked: 300,
            }
        );
        assert_eq!(ledger.staked_of(&a.address), 300);
        assert_eq!(ledger.balance_of(&a.address), 700);

        ledger.unstake(&stake_req(a.address, 100)).unwrap();
        assert_eq!(ledger.staked_of(&a.address), 200);
        assert_eq!(ledger.balance_of(&a.address), 800);
        assert_eq!(ledger.total_supply(), 1_000);
    }

    #[test]
    fn signed_transfer_updates_both_balances() {
        let a = Account::random();
        let b = Account::random();
        let mut ledger = funded(&a.address, 1_000);

        let receipt = ledger
            .transfer(&a.transfer(&b.address, 100), MessagePolicy::Canonical)
            .unwrap();
        match receipt {
            OperationReceipt::Transfer {
                from_balance,
                to_balance,
                amount,
                ..
            } => {
                assert_eq!(amount, 100);
                assert_eq!(from_balance, 900);
                assert_eq!(to_balance, 100);
            }
            other => panic!("unexpected receipt {other:?}"),
        }
        assert_eq!(ledger.balance_of(&a.address), 900);
        assert_eq!(ledger.balance_of(&b.address), 100);
    }

    #[test]
    fn signature_over_other_message_is_unauthorized() {
        let a = Account::random();
        let b = Account::random();
        let mut ledger = funded(&a.address, 1_000);
        let before = ledger.clone();

        let mut request = a.transfer(&b.address, 100);
        request.signature = a.key.sign(b"transfer 999 to nobody").to_bytes().to_vec();
        for policy in [MessagePolicy::Canonical, MessagePolicy::Verbatim] {
            assert_eq!(
                ledger.transfer(&request, policy),
                Err(LedgerError::Unauthorized)
            );
        }
        assert_eq!(ledger, before);
    }

    #[test]
    fn tampering_any_field_is_unauthorized() {
        let a = Account::random();
        let b = Account::random();
        let mut ledger = funded(&a.address, 1_000);
        let valid = a.transfer(&b.address, 100);

        let mut bad_sig = valid.clone();
        bad_sig.signature[10] ^= 0x01;
        let mut bad_key = valid.clone();
        bad_key.public_key[0] ^= 0x01;
        let mut bad_msg = valid.clone();
        bad_msg.message[0] ^= 0x01;
        let mut foreign_from = valid.clone();
        foreign_from.from = b.address;

        for request in [bad_sig, bad_key, bad_msg, foreign_from] {
            assert_eq!(
                ledger.transfer(&request, MessagePolicy::Verbatim),
                Err(LedgerError::Unauthorized)
            );
        }
        assert_eq!(ledger.balance_of(&a.address), 1_000);
    }

    #[test]
    fn canonical_policy_refuses_replayed_message() {
        let a = Account::random();
        let b = Account::random();
        let c = Account::random();
        let mut ledger = funded(&a.address, 1_000);

        // Signed for 10 to b, submitted as 500 to c.
        let request = a.transfer_signed(&c.address, 500, &transfer_message(10, &b.address));
        assert_eq!(
            ledger.transfer(&request, MessagePolicy::Canonical),
            Err(LedgerError::Unauthorized)
        );
        ledger.transfer(&request, MessagePolicy::Verbatim).unwrap();
        assert_eq!(ledger.balance_of(&c.address), 500);
    }

    #[test]
    fn transfer_without_funds_is_rejected() {
        let a = Account::random();
        let b = Account::random();
        let mut ledger = LedgerState::new();
        assert_eq!(
            ledger.transfer(&a.transfer(&b.address, 50), MessagePolicy::Canonical),
            Err(LedgerError::InsufficientBalance {
                address: a.address,
                available: 0,
                requested: 50,
            })
        );
        assert_eq!(ledger, LedgerState::new());
    }

    #[test]
    fn non_positive_amounts_are_invalid() {
        let a = Account::random();
        let mut ledger = funded(&a.address, 1_000);
        for amount in [-5, 0] {
            assert_eq!(
                ledger.stake(&stake_req(a.address, amount)),
                Err(LedgerError::InvalidAmount { amount })
            );
            assert_eq!(
                ledger.unstake(&stake_req(a.address, amount)),
                Err(LedgerError::InvalidAmount { amount })
            );
            assert_eq!(
                ledger.transfer(&a.transfer(&a.address, amount), MessagePolicy::Verbatim),
                Err(LedgerError::InvalidAmount { amount })
            );
        }
        assert_eq!(ledger.balance_of(&a.address), 1_000);
    }

    #[test]
    fn invalid_amount_is_checked_before_authorization() {
        let a = Account::random();
        let b = Account::random();
        let mut ledger = funded(&a.address, 1_000);
        let mut request = a.transfer(&b.address, 0);
        request.signature = vec![0u8; 3];
        assert_eq!(
            ledger.transfer(&request, MessagePolicy::Canonical),
            Err(LedgerError::InvalidAmount { amount: 0 })
        );
    }

    #[test]
    fn unstaking_more_than_staked_is_rejected() {
        let a = Account::random();
        let mut ledger = funded(&a.address, 1_000);
        ledger.stake(&stake_req(a.address, 50)).unwrap();
        let before = ledger.clone();
        assert_eq!(
            ledger.unstake(&stake_req(a.address, 51)),
            Err(LedgerError::InsufficientStake {
                address: a.address,
                staked: 50,
                requested: 51,
            })
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn staking_more_than_balance_is_rejected() {
        let a = Account::random();
        let mut ledger = funded(&a.address, 10);
        assert!(matches!(
            ledger.stake(&stake_req(a.address, 11)),
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert_eq!(ledger.staked_of(&a.address), 0);
    }

    #[test]
    fn self_transfer_is_permitted_and_neutral() {
        let a = Account::random();
        let mut ledger = funded(&a.address, 40);
        let receipt = ledger
            .transfer(&a.transfer(&a.address, 40), MessagePolicy::Canonical)
            .unwrap();
        assert_eq!(
            receipt,
            OperationReceipt::Transfer {
                from: a.address,
                to: a.address,
                amount: 40,
                from_balance: 40,
                to_balance: 40,
            }
        );
        // Still bounded by the balance.
        assert!(matches!(
            ledger.transfer(&a.transfer(&a.address, 41), MessagePolicy::Canonical),
            Err(LedgerError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn overflowing_credit_rejects_without_mutation() {
        let a = Account::random();
        let b = Account::random();
        let mut ledger = funded(&a.address, 10);
        ledger.credit(&b.address, Amount::MAX).unwrap();
        let before = ledger.clone();
        assert_eq!(
            ledger.transfer(&a.transfer(&b.address, 1), MessagePolicy::Canonical),
            Err(LedgerError::BalanceOverflow {
                address: b.address,
                amount: 1,
            })
        );
        assert_eq!(ledger, before);
        assert!(ledger.credit(&b.address, 1).is_err());
    }

    #[test]
    fn queries_default_to_zero_and_do_not_mutate() {
        let a = Account::random();
        let ledger = LedgerState::new();
        assert_eq!(ledger.balance_of(&a.address), 0);
        assert_eq!(ledger.staked_of(&a.address), 0);
        assert_eq!(ledger.balance_of(&a.address), 0);
        assert!(ledger.balances.is_empty());
        assert!(ledger.stakes.is_empty());
    }

    #[test]
    fn receipt_serializes_with_transport_field_names() {
        let a = Account::from_seed(1);
        let b = Account::from_seed(2);
        let receipt = OperationReceipt::Transfer {
            from: a.address,
            to: b.address,
            amount: 5,
            from_balance: 1,
            to_balance: 5,
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["type"], "transfer");
        assert_eq!(json["from_addr"], a.address.to_string());
        assert_eq!(json["to_addr"], b.address.to_string());
    }

    #[derive(Clone, Debug)]
    enum Step {
        Transfer { from: usize, to: usize, amount: i64 },
        Stake { who: usize, amount: i64 },
        Unstake { who: usize, amount: i64 },
    }

    fn arb_step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (0usize..4, 0usize..4, -10i64..400).prop_map(|(from, to, amount)| Step::Transfer {
                from,
                to,
                amount
            }),
            (0usize..4, -10i64..400).prop_map(|(who, amount)| Step::Stake { who, amount }),
            (0usize..4, -10i64..400).prop_map(|(who, amount)| Step::Unstake { who, amount }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn supply_is_conserved_and_rejections_do_not_mutate(
            seeds in prop::collection::vec(0u64..1_000, 4),
            steps in prop::collection::vec(arb_step(), 1..40),
        ) {
            let accounts: Vec<Account> = (1..=4u8).map(Account::from_seed).collect();
            let mut ledger = LedgerState::new();
            for (account, seed) in accounts.iter().zip(&seeds) {
                ledger.credit(&account.address, *seed).unwrap();
            }
            let supply = ledger.total_supply();

            for step in steps {
                let before = ledger.clone();
                let result = match step {
                    Step::Transfer { from, to, amount } => ledger.transfer(
                        &accounts[from].transfer(&accounts[to].address, amount),
                        MessagePolicy::Canonical,
                    ),
                    Step::Stake { who, amount } => {
                        ledger.stake(&stake_req(accounts[who].address, amount))
                    }
                    Step::Unstake { who, amount } => {
                        ledger.unstake(&stake_req(accounts[who].address, amount))
                    }
                };
                if result.is_err() {
                    prop_assert_eq!(&ledger, &before);
                }
                prop_assert_eq!(ledger.total_supply(), supply);
            }
        }
    }
}
