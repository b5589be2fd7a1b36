use thiserror::Error;

use crate::{AccountId, Amount, SequenceIndex};

/// Errors surfaced by the ledger core.
///
/// Every variant is raised before any checkpoint is written, so a rejected
/// operation leaves the ledger exactly as it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A debit would drive the account balance below zero.
    #[error("insufficient balance in account {account}: have {balance}, need {requested}")]
    InsufficientBalance {
        account: AccountId,
        balance: Amount,
        requested: Amount,
    },

    /// A credit would push the account balance past `u64::MAX`.
    #[error("balance overflow in account {account}")]
    BalanceOverflow { account: AccountId },

    /// A mint would push total supply past `u64::MAX`.
    #[error("total supply overflow")]
    SupplyOverflow,

    /// The delegator already has `limit` delegatees and tried to add another.
    #[error("account {delegator} already delegates to {limit} accounts")]
    DelegationLimitExceeded { delegator: AccountId, limit: usize },

    /// The delegator's outgoing percentages would sum past 100%.
    #[error("account {delegator} would delegate {total} of {base} percentage units")]
    DelegationPercentageExceeded {
        delegator: AccountId,
        total: u64,
        base: u32,
    },

    /// A write was attempted behind the latest checkpoint.
    #[error("non-monotonic index: attempted {attempted}, latest is {latest}")]
    NonMonotonicIndex {
        latest: SequenceIndex,
        attempted: SequenceIndex,
    },

    /// A cascade would drive a vote power checkpoint negative. Unreachable on a
    /// consistent ledger.
    #[error("vote power underflow for account {account}")]
    VotePowerUnderflow { account: AccountId },
}
