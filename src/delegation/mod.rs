use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    checkpoint::CheckpointStore, error::LedgerError, ledger::BalanceLedger,
    votepower::VotePowerAccumulator, AccountId, SequenceIndex,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelegationEntry {
    pub delegatee: AccountId,
    /// In units of `1 / percentage_base`; never zero once stored.
    pub percentage: u32,
}

/// Outgoing delegations of one account, in insertion order.
pub type DelegationList = Vec<DelegationEntry>;

/// Effect of one accepted `set_delegation` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelegationChange {
    pub old_percentage: u32,
    pub new_percentage: u32,
}

impl DelegationChange {
    pub fn percentage_delta(&self) -> i64 {
        self.new_percentage as i64 - self.old_percentage as i64
    }

    pub fn is_noop(&self) -> bool {
        self.old_percentage == self.new_percentage
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DelegationRegistry {
    limit: usize,
    base: u32,
    lists: CheckpointStore<AccountId, DelegationList>,
}

impl DelegationRegistry {
    pub fn new(limit: usize, percentage_base: u32) -> Self {
        Self {
            limit,
            base: percentage_base,
            lists: CheckpointStore::new(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Sets the share of `delegator`'s vote power handed to `delegatee`.
    ///
    /// An existing entry is replaced, not topped up. A percentage of zero drops
    /// the entry and frees its slot. The vote power cascade runs before the new
    /// list is recorded; a rejected call touches neither.
    pub fn set_delegation(
        &mut self,
        delegator: &AccountId,
        delegatee: &AccountId,
        percentage: u32,
        index: SequenceIndex,
        balances: &BalanceLedger,
        votes: &mut VotePowerAccumulator,
    ) -> Result<DelegationChange, LedgerError> {
        self.lists.ensure_writable(delegator, index)?;
        let mut list = self.lists.read_latest(delegator);
        let position = list.iter().position(|e| &e.delegatee == delegatee);
        let old_percentage = position.map(|pos| list[pos].percentage).unwrap_or(0);

        match position {
            Some(pos) if percentage == 0 => {
                list.remove(pos);
            }
            Some(pos) => list[pos].percentage = percentage,
            None if percentage == 0 => {
                return Ok(DelegationChange {
                    old_percentage,
                    new_percentage: 0,
                });
            }
            None => {
                if list.len() >= self.limit {
                    return Err(LedgerError::DelegationLimitExceeded {
                        delegator: delegator.clone(),
                        limit: self.limit,
                    });
                }
                list.push(DelegationEntry {
                    delegatee: delegatee.clone(),
                    percentage,
                });
            }
        }

        let total: u64 = list.iter().map(|e| e.percentage as u64).sum();
        if total > self.base as u64 {
            return Err(LedgerError::DelegationPercentageExceeded {
                delegator: delegator.clone(),
                total,
                base: self.base,
            });
        }

        let balance = balances.balance_of(delegator);
        votes.on_delegation_changed(
            delegator,
            delegatee,
            old_percentage,
            percentage,
            balance,
            index,
        )?;
        debug!(%delegator, %delegatee, old_percentage, percentage, index, "delegation updated");
        self.lists.write_at(delegator, index, list)?;
        Ok(DelegationChange {
            old_percentage,
            new_percentage: percentage,
        })
    }

    pub(crate) fn begin(&mut self) {
        self.lists.begin();
    }

    pub(crate) fn commit(&mut self) {
        self.lists.commit();
    }

    pub(crate) fn rollback(&mut self) {
        self.lists.rollback();
    }

    pub fn delegation_list_at(&self, delegator: &AccountId, index: SequenceIndex) -> DelegationList {
        self.lists.read_at(delegator, index)
    }

    pub fn delegation_list_of(&self, delegator: &AccountId) -> DelegationList {
        self.lists.read_latest(delegator)
    }

    /// Borrowing variant of [`Self::delegation_list_of`] for the balance cascade.
    pub fn current_entries(&self, delegator: &AccountId) -> &[DelegationEntry] {
        self.lists
            .get_latest(delegator)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn delegated_percentage_at(&self, delegator: &AccountId, index: SequenceIndex) -> u32 {
        self.lists
            .get_at(delegator, index)
            .map(|list| list.iter().map(|e| e.percentage).sum())
            .unwrap_or(0)
    }

    pub fn undelegated_percentage_at(&self, delegator: &AccountId, index: SequenceIndex) -> u32 {
        self.base - self.delegated_percentage_at(delegator, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        balances: BalanceLedger,
        registry: DelegationRegistry,
        votes: VotePowerAccumulator,
    }

    impl Fixture {
        fn new(limit: usize) -> Self {
            Self {
                balances: BalanceLedger::new(),
                registry: DelegationRegistry::new(limit, 10_000),
                votes: VotePowerAccumulator::new(10_000),
            }
        }

        fn fund(&mut self, account: &str, amount: i128, index: SequenceIndex) {
            self.balances
                .credit_debit(&account.into(), amount, index, &self.registry, &mut self.votes)
                .unwrap();
        }

        fn delegate(
            &mut self,
            from: &str,
            to: &str,
            percentage: u32,
            index: SequenceIndex,
        ) -> Result<DelegationChange, LedgerError> {
            self.registry.set_delegation(
                &from.into(),
                &to.into(),
                percentage,
                index,
                &self.balances,
                &mut self.votes,
            )
        }
    }

    #[test]
    fn existing_delegatee_is_replaced_not_added() {
        let mut fx = Fixture::new(5);
        fx.fund("alice", 100, 1);
        fx.delegate("alice", "bob", 3_000, 2).unwrap();
        let change = fx.delegate("alice", "bob", 2_000, 3).unwrap();
        assert_eq!(change.percentage_delta(), -1_000);
        let list = fx.registry.delegation_list_of(&"alice".into());
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].percentage, 2_000);
        assert_eq!(fx.votes.received_vote_power_of(&"bob".into()), 20);
        assert_eq!(fx.votes.own_vote_power_of(&"alice".into()), 80);
    }

    #[test]
    fn limit_is_enforced_on_new_delegatees_only() {
        let mut fx = Fixture::new(2);
        fx.fund("alice", 100, 1);
        fx.delegate("alice", "bob", 1_000, 2).unwrap();
        fx.delegate("alice", "carol", 1_000, 2).unwrap();
        let err = fx.delegate("alice", "dave", 1_000, 3).unwrap_err();
        assert_eq!(
            err,
            LedgerError::DelegationLimitExceeded {
                delegator: "alice".into(),
                limit: 2
            }
        );
        // updating an existing entry at capacity is fine
        fx.delegate("alice", "carol", 4_000, 3).unwrap();
        assert_eq!(fx.registry.delegated_percentage_at(&"alice".into(), 3), 5_000);
    }

    #[test]
    fn zero_percentage_frees_a_slot_and_keeps_other_entries() {
        let mut fx = Fixture::new(2);
        fx.fund("alice", 100, 1);
        fx.delegate("alice", "bob", 1_000, 2).unwrap();
        fx.delegate("alice", "carol", 2_000, 2).unwrap();
        fx.delegate("alice", "bob", 0, 3).unwrap();
        fx.delegate("alice", "dave", 3_000, 4).unwrap();

        let list = fx.registry.delegation_list_of(&"alice".into());
        assert_eq!(
            list,
            vec![
                DelegationEntry {
                    delegatee: "carol".into(),
                    percentage: 2_000
                },
                DelegationEntry {
                    delegatee: "dave".into(),
                    percentage: 3_000
                },
            ]
        );
        assert_eq!(fx.votes.received_vote_power_of(&"bob".into()), 0);
        assert_eq!(fx.votes.received_vote_power_of(&"carol".into()), 20);
        assert_eq!(fx.registry.delegation_list_at(&"alice".into(), 2).len(), 2);
    }

    #[test]
    fn zero_percentage_for_unknown_delegatee_is_a_noop() {
        let mut fx = Fixture::new(1);
        fx.fund("alice", 100, 1);
        fx.delegate("alice", "bob", 1_000, 2).unwrap();
        let change = fx.delegate("alice", "carol", 0, 3).unwrap();
        assert!(change.is_noop());
        assert_eq!(fx.registry.delegation_list_of(&"alice".into()).len(), 1);
    }

    #[test]
    fn percentage_cap_rejects_without_side_effects() {
        let mut fx = Fixture::new(5);
        fx.fund("alice", 100, 1);
        fx.delegate("alice", "bob", 6_000, 2).unwrap();
        let err = fx.delegate("alice", "carol", 4_001, 3).unwrap_err();
        assert_eq!(
            err,
            LedgerError::DelegationPercentageExceeded {
                delegator: "alice".into(),
                total: 10_001,
                base: 10_000
            }
        );
        assert_eq!(fx.registry.delegation_list_of(&"alice".into()).len(), 1);
        assert_eq!(fx.votes.received_vote_power_of(&"carol".into()), 0);
        assert_eq!(fx.votes.own_vote_power_of(&"alice".into()), 40);
        // exactly 100% is allowed
        fx.delegate("alice", "carol", 4_000, 3).unwrap();
        assert_eq!(fx.registry.undelegated_percentage_at(&"alice".into(), 3), 0);
        assert_eq!(fx.votes.own_vote_power_of(&"alice".into()), 0);
    }

    #[test]
    fn delegating_without_balance_records_the_list_only() {
        let mut fx = Fixture::new(5);
        fx.delegate("alice", "bob", 5_000, 1).unwrap();
        assert_eq!(fx.votes.vote_power_of(&"bob".into()), 0);
        fx.fund("alice", 10, 2);
        assert_eq!(fx.votes.received_vote_power_of(&"bob".into()), 5);
        assert_eq!(fx.votes.own_vote_power_of(&"alice".into()), 5);
    }
}
