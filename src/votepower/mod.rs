use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    checkpoint::CheckpointStore, delegation::DelegationEntry, error::LedgerError, AccountId,
    Amount, SequenceIndex,
};

/// Portion of `balance` handed out through one delegation edge of `percentage`.
///
/// Truncates toward zero. Each edge is always recomputed from the full balance,
/// never from a delta, so an edge's contribution does not depend on the path of
/// mutations that produced the balance.
pub fn share(balance: Amount, percentage: u32, base: u32) -> Amount {
    (balance as u128 * percentage as u128 / base as u128) as Amount
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Lane {
    Own,
    Received,
}

/// Pending signed adjustments of one cascade, merged per (lane, account).
#[derive(Default)]
struct CascadeDeltas(BTreeMap<(Lane, AccountId), i128>);

impl CascadeDeltas {
    fn add(&mut self, lane: Lane, account: &AccountId, delta: i128) {
        *self.0.entry((lane, account.clone())).or_default() += delta;
    }
}

/// Push-maintained vote power.
///
/// `own` holds what an account keeps from its own balance after delegating;
/// `received` holds what others delegate to it. Only the two cascade hooks
/// write here, and each touches at most `delegation_limit + 1` accounts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VotePowerAccumulator {
    base: u32,
    own: CheckpointStore<AccountId, Amount>,
    received: CheckpointStore<AccountId, Amount>,
}

impl VotePowerAccumulator {
    pub fn new(percentage_base: u32) -> Self {
        Self {
            base: percentage_base,
            own: CheckpointStore::new(),
            received: CheckpointStore::new(),
        }
    }

    pub fn percentage_base(&self) -> u32 {
        self.base
    }

    /// Balance hook: `account` moved from `old_balance` to `new_balance` while
    /// delegating according to `delegations`.
    pub fn on_balance_changed(
        &mut self,
        account: &AccountId,
        old_balance: Amount,
        new_balance: Amount,
        delegations: &[DelegationEntry],
        index: SequenceIndex,
    ) -> Result<(), LedgerError> {
        let mut deltas = CascadeDeltas::default();
        let mut handed_out = 0i128;
        for entry in delegations {
            let diff = share(new_balance, entry.percentage, self.base) as i128
                - share(old_balance, entry.percentage, self.base) as i128;
            deltas.add(Lane::Received, &entry.delegatee, diff);
            handed_out += diff;
        }
        // truncation remainders stay with the holder
        let own_delta = (new_balance as i128 - old_balance as i128) - handed_out;
        deltas.add(Lane::Own, account, own_delta);
        self.apply_deltas(deltas, index)
    }

    /// Delegation hook: the `delegator -> delegatee` edge moved from
    /// `old_percentage` to `new_percentage` while the delegator holds `balance`.
    pub fn on_delegation_changed(
        &mut self,
        delegator: &AccountId,
        delegatee: &AccountId,
        old_percentage: u32,
        new_percentage: u32,
        balance: Amount,
        index: SequenceIndex,
    ) -> Result<(), LedgerError> {
        let diff = share(balance, new_percentage, self.base) as i128
            - share(balance, old_percentage, self.base) as i128;
        let mut deltas = CascadeDeltas::default();
        deltas.add(Lane::Received, delegatee, diff);
        deltas.add(Lane::Own, delegator, -diff);
        self.apply_deltas(deltas, index)
    }

    fn store(&self, lane: Lane) -> &CheckpointStore<AccountId, Amount> {
        match lane {
            Lane::Own => &self.own,
            Lane::Received => &self.received,
        }
    }

    fn store_mut(&mut self, lane: Lane) -> &mut CheckpointStore<AccountId, Amount> {
        match lane {
            Lane::Own => &mut self.own,
            Lane::Received => &mut self.received,
        }
    }

    /// Resolves every delta against the latest checkpoints, then writes. Nothing
    /// is written unless all deltas resolve.
    fn apply_deltas(&mut self, deltas: CascadeDeltas, index: SequenceIndex) -> Result<(), LedgerError> {
        let mut writes = Vec::with_capacity(deltas.0.len());
        for ((lane, account), delta) in deltas.0 {
            if delta == 0 {
                continue;
            }
            let store = self.store(lane);
            store.ensure_writable(&account, index)?;
            let next = store.read_latest(&account) as i128 + delta;
            let next = Amount::try_from(next).map_err(|_| LedgerError::VotePowerUnderflow {
                account: account.clone(),
            })?;
            writes.push((lane, account, next));
        }
        for (lane, account, value) in writes {
            debug!(?lane, %account, value, index, "vote power checkpoint");
            self.store_mut(lane).write_at(&account, index, value)?;
        }
        Ok(())
    }

    pub(crate) fn begin(&mut self) {
        self.own.begin();
        self.received.begin();
    }

    pub(crate) fn commit(&mut self) {
        self.own.commit();
        self.received.commit();
    }

    pub(crate) fn rollback(&mut self) {
        self.own.rollback();
        self.received.rollback();
    }

    pub fn own_vote_power_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.own.read_at(account, index)
    }

    pub fn received_vote_power_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.received.read_at(account, index)
    }

    pub fn vote_power_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.own_vote_power_at(account, index) + self.received_vote_power_at(account, index)
    }

    pub fn own_vote_power_of(&self, account: &AccountId) -> Amount {
        self.own.read_latest(account)
    }

    pub fn received_vote_power_of(&self, account: &AccountId) -> Amount {
        self.received.read_latest(account)
    }

    pub fn vote_power_of(&self, account: &AccountId) -> Amount {
        self.own_vote_power_of(account) + self.received_vote_power_of(account)
    }

    /// Every account that ever held own or received vote power.
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        self.own.keys().chain(self.received.keys()).cloned().collect()
    }
}
