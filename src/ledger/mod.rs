use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    checkpoint::CheckpointStore, delegation::DelegationRegistry, error::LedgerError,
    votepower::VotePowerAccumulator, AccountId, Amount, SequenceIndex,
};

/// Checkpointed account balances.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceLedger {
    balances: CheckpointStore<AccountId, Amount>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a signed balance change to `account` at `index` and cascades it
    /// into vote power before returning. Returns the new balance.
    ///
    /// A debit larger than the current balance is rejected with nothing written;
    /// callers applying multi-leg operations must validate every leg first.
    pub fn credit_debit(
        &mut self,
        account: &AccountId,
        delta: i128,
        index: SequenceIndex,
        registry: &DelegationRegistry,
        votes: &mut VotePowerAccumulator,
    ) -> Result<Amount, LedgerError> {
        self.balances.ensure_writable(account, index)?;
        let current = self.balances.read_latest(account);
        if delta == 0 {
            return Ok(current);
        }
        let overflow = || LedgerError::BalanceOverflow {
            account: account.clone(),
        };
        // a non-negative balance plus any i128 can only overflow upward
        let next = (current as i128).checked_add(delta).ok_or_else(overflow)?;
        if next < 0 {
            return Err(LedgerError::InsufficientBalance {
                account: account.clone(),
                balance: current,
                requested: Amount::try_from(delta.unsigned_abs()).unwrap_or(Amount::MAX),
            });
        }
        let next = Amount::try_from(next).map_err(|_| overflow())?;

        votes.on_balance_changed(account, current, next, registry.current_entries(account), index)?;
        debug!(%account, delta, balance = next, index, "balance checkpoint");
        self.balances.write_at(account, index, next)?;
        Ok(next)
    }

    pub fn balance_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.balances.read_at(account, index)
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.read_latest(account)
    }

    pub(crate) fn begin(&mut self) {
        self.balances.begin();
    }

    pub(crate) fn commit(&mut self) {
        self.balances.commit();
    }

    pub(crate) fn rollback(&mut self) {
        self.balances.rollback();
    }

    /// Every account that ever held a balance checkpoint.
    pub fn accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.balances.keys()
    }
}
