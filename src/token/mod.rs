use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    checkpoint::CheckpointStore,
    config::{ConfigError, LedgerConfig},
    delegation::{DelegationChange, DelegationList, DelegationRegistry},
    error::LedgerError,
    ledger::BalanceLedger,
    votepower::VotePowerAccumulator,
    AccountId, Amount, SequenceIndex,
};

mod snapshot;

pub use snapshot::{AccountView, LedgerSnapshot, SnapshotMetadata};

/// Index at which genesis allocations are minted.
pub const GENESIS_INDEX: SequenceIndex = 0;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        to: AccountId,
        amount: Amount,
    },
    Burned {
        from: AccountId,
        amount: Amount,
    },
    Transferred {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
    DelegationSet {
        delegator: AccountId,
        delegatee: AccountId,
        old_percentage: u32,
        new_percentage: u32,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub index: SequenceIndex,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerMutation {
    Mint {
        to: AccountId,
        amount: Amount,
    },
    Burn {
        from: AccountId,
        amount: Amount,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        #[serde(default)]
        memo: Option<String>,
    },
    Delegate {
        delegator: AccountId,
        delegatee: AccountId,
        percentage: u32,
    },
}

/// A batch of mutations committed together at one index.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationBlock {
    pub index: SequenceIndex,
    pub mutations: Vec<LedgerMutation>,
}

#[derive(Clone, Copy)]
enum Journal {
    Begin,
    Commit,
    Rollback,
}

/// Token surface over the checkpointed core.
///
/// Mutations must arrive with non-decreasing indices; several mutations may
/// share one index and collapse into one checkpoint per quantity.
#[derive(Clone, Debug)]
pub struct TokenLedger {
    config: LedgerConfig,
    balances: BalanceLedger,
    delegations: DelegationRegistry,
    votes: VotePowerAccumulator,
    supply: CheckpointStore<(), Amount>,
    events: Vec<EventRecord>,
    index: SequenceIndex,
}

impl TokenLedger {
    /// Builds an empty ledger and mints the configured genesis allocations.
    pub fn new(config: LedgerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let base = config.percentage_base();
        let mut ledger = Self {
            balances: BalanceLedger::new(),
            delegations: DelegationRegistry::new(config.delegation_limit, base),
            votes: VotePowerAccumulator::new(base),
            supply: CheckpointStore::new(),
            events: Vec::new(),
            index: GENESIS_INDEX,
            config,
        };
        let genesis = ledger.config.genesis.clone();
        for (account, amount) in &genesis {
            ledger
                .mint(account, *amount, GENESIS_INDEX)
                .map_err(|err| ConfigError::Invalid(format!("genesis for {account}: {err}")))?;
        }
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Index of the latest accepted mutation.
    pub fn current_index(&self) -> SequenceIndex {
        self.index
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    fn check_index(&self, index: SequenceIndex) -> Result<(), LedgerError> {
        if index < self.index {
            return Err(LedgerError::NonMonotonicIndex {
                latest: self.index,
                attempted: index,
            });
        }
        Ok(())
    }

    fn record(&mut self, index: SequenceIndex, event: LedgerEvent) {
        self.index = index;
        self.events.push(EventRecord { index, event });
    }

    /// Applies a signed balance change and moves total supply by the same amount.
    pub fn credit_debit(
        &mut self,
        account: &AccountId,
        delta: i128,
        index: SequenceIndex,
    ) -> Result<Amount, LedgerError> {
        self.check_index(index)?;
        let supply = self.supply.read_latest(&());
        let next_supply = (supply as i128)
            .checked_add(delta)
            .filter(|next| *next <= Amount::MAX as i128)
            .ok_or(LedgerError::SupplyOverflow)?;
        let balance =
            self.balances
                .credit_debit(account, delta, index, &self.delegations, &mut self.votes)?;
        // the balance check above bounds any debit by the supply
        self.supply.write_at(&(), index, next_supply as Amount)?;
        self.index = index;
        Ok(balance)
    }

    pub fn mint(&mut self, to: &AccountId, amount: Amount, index: SequenceIndex) -> Result<(), LedgerError> {
        self.credit_debit(to, amount as i128, index)?;
        self.record(
            index,
            LedgerEvent::Minted {
                to: to.clone(),
                amount,
            },
        );
        Ok(())
    }

    pub fn burn(&mut self, from: &AccountId, amount: Amount, index: SequenceIndex) -> Result<(), LedgerError> {
        self.credit_debit(from, -(amount as i128), index)?;
        self.record(
            index,
            LedgerEvent::Burned {
                from: from.clone(),
                amount,
            },
        );
        Ok(())
    }

    /// Moves `amount` from `from` to `to`; both legs land at `index` or neither does.
    pub fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
        memo: Option<String>,
        index: SequenceIndex,
    ) -> Result<(), LedgerError> {
        self.check_index(index)?;
        let available = self.balances.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from.clone(),
                balance: available,
                requested: amount,
            });
        }
        if from != to {
            self.balances
                .credit_debit(from, -(amount as i128), index, &self.delegations, &mut self.votes)?;
            self.balances
                .credit_debit(to, amount as i128, index, &self.delegations, &mut self.votes)?;
        }
        self.record(
            index,
            LedgerEvent::Transferred {
                from: from.clone(),
                to: to.clone(),
                amount,
                memo,
            },
        );
        Ok(())
    }

    pub fn set_delegation(
        &mut self,
        delegator: &AccountId,
        delegatee: &AccountId,
        percentage: u32,
        index: SequenceIndex,
    ) -> Result<DelegationChange, LedgerError> {
        self.check_index(index)?;
        let change = self.delegations.set_delegation(
            delegator,
            delegatee,
            percentage,
            index,
            &self.balances,
            &mut self.votes,
        )?;
        if !change.is_noop() {
            self.record(
                index,
                LedgerEvent::DelegationSet {
                    delegator: delegator.clone(),
                    delegatee: delegatee.clone(),
                    old_percentage: change.old_percentage,
                    new_percentage: change.new_percentage,
                },
            );
        }
        Ok(change)
    }

    fn apply_one(&mut self, mutation: &LedgerMutation, index: SequenceIndex) -> Result<(), LedgerError> {
        match mutation {
            LedgerMutation::Mint { to, amount } => self.mint(to, *amount, index),
            LedgerMutation::Burn { from, amount } => self.burn(from, *amount, index),
            LedgerMutation::Transfer {
                from,
                to,
                amount,
                memo,
            } => self.transfer(from, to, *amount, memo.clone(), index),
            LedgerMutation::Delegate {
                delegator,
                delegatee,
                percentage,
            } => self
                .set_delegation(delegator, delegatee, *percentage, index)
                .map(|_| ()),
        }
    }

    /// Applies `mutations` in order at `index`. If any of them is rejected the
    /// ledger is restored to its state before the batch.
    pub fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        index: SequenceIndex,
    ) -> Result<(), LedgerError> {
        self.check_index(index)?;
        let (events_len, index_before) = (self.events.len(), self.index);
        self.for_each_store(Journal::Begin);
        for (position, mutation) in mutations.iter().enumerate() {
            if let Err(err) = self.apply_one(mutation, index) {
                warn!(index, position, %err, "mutation batch rejected");
                self.for_each_store(Journal::Rollback);
                self.events.truncate(events_len);
                self.index = index_before;
                return Err(err);
            }
        }
        self.for_each_store(Journal::Commit);
        info!(index, count = mutations.len(), "mutation batch applied");
        Ok(())
    }

    fn for_each_store(&mut self, step: Journal) {
        match step {
            Journal::Begin => {
                self.balances.begin();
                self.delegations.begin();
                self.votes.begin();
                self.supply.begin();
            }
            Journal::Commit => {
                self.balances.commit();
                self.delegations.commit();
                self.votes.commit();
                self.supply.commit();
            }
            Journal::Rollback => {
                self.balances.rollback();
                self.delegations.rollback();
                self.votes.rollback();
                self.supply.rollback();
            }
        }
    }

    pub fn apply_block(&mut self, block: &MutationBlock) -> Result<(), LedgerError> {
        self.apply_mutations(&block.mutations, block.index)
    }

    pub fn balance_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.balances.balance_at(account, index)
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.balance_of(account)
    }

    pub fn total_supply_at(&self, index: SequenceIndex) -> Amount {
        self.supply.read_at(&(), index)
    }

    pub fn total_supply(&self) -> Amount {
        self.supply.read_latest(&())
    }

    pub fn vote_power_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.votes.vote_power_at(account, index)
    }

    pub fn vote_power_of(&self, account: &AccountId) -> Amount {
        self.votes.vote_power_of(account)
    }

    pub fn own_vote_power_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.votes.own_vote_power_at(account, index)
    }

    pub fn received_vote_power_at(&self, account: &AccountId, index: SequenceIndex) -> Amount {
        self.votes.received_vote_power_at(account, index)
    }

    pub fn delegation_list_at(&self, delegator: &AccountId, index: SequenceIndex) -> DelegationList {
        self.delegations.delegation_list_at(delegator, index)
    }

    pub fn delegation_list_of(&self, delegator: &AccountId) -> DelegationList {
        self.delegations.delegation_list_of(delegator)
    }

    /// Every account that ever held a balance or vote power.
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        let mut accounts = self.votes.accounts();
        accounts.extend(self.balances.accounts().cloned());
        accounts
    }

    /// Point-in-time view of one account.
    pub fn account_view_at(&self, account: &AccountId, index: SequenceIndex) -> AccountView {
        AccountView {
            balance: self.balance_at(account, index),
            own_vote_power: self.own_vote_power_at(account, index),
            received_vote_power: self.received_vote_power_at(account, index),
            delegations: self.delegation_list_at(account, index),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let accounts: BTreeMap<AccountId, AccountView> = self
            .accounts()
            .into_iter()
            .map(|account| {
                let view = self.account_view_at(&account, self.index);
                (account, view)
            })
            .collect();
        LedgerSnapshot {
            meta: SnapshotMetadata {
                index: self.index,
                total_supply: self.total_supply(),
                decimals: self.config.decimals,
                percentage_precision: self.config.percentage_precision,
                delegation_limit: self.config.delegation_limit,
            },
            state_root: snapshot::compute_state_root(&accounts),
            accounts,
            events: self.events.clone(),
        }
    }
}
