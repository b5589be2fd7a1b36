use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{delegation::DelegationList, AccountId, Amount, SequenceIndex};

use super::EventRecord;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMetadata {
    pub index: SequenceIndex,
    pub total_supply: Amount,
    pub decimals: u8,
    pub percentage_precision: u32,
    pub delegation_limit: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountView {
    pub balance: Amount,
    pub own_vote_power: Amount,
    pub received_vote_power: Amount,
    pub delegations: DelegationList,
}

impl AccountView {
    pub fn vote_power(&self) -> Amount {
        self.own_vote_power + self.received_vote_power
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub accounts: BTreeMap<AccountId, AccountView>,
    pub events: Vec<EventRecord>,
    #[serde(with = "hex32")]
    pub state_root: [u8; 32],
}

/// Root over one leaf per account, in account order.
///
/// The tree splits at the largest power of two below the leaf count, so an
/// unpaired subtree is promoted unchanged instead of being hashed with itself.
pub(crate) fn compute_state_root(accounts: &BTreeMap<AccountId, AccountView>) -> [u8; 32] {
    let leaves: Vec<[u8; 32]> = accounts
        .iter()
        .map(|(account, view)| account_leaf(account, view))
        .collect();
    subtree_root(&leaves)
}

fn account_leaf(account: &AccountId, view: &AccountView) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(LEAF_TAG);
    update_str(&mut hasher, account);
    hasher.update(view.balance.to_le_bytes());
    hasher.update(view.own_vote_power.to_le_bytes());
    hasher.update(view.received_vote_power.to_le_bytes());
    for entry in &view.delegations {
        hasher.update(b"dlg");
        update_str(&mut hasher, &entry.delegatee);
        hasher.update(entry.percentage.to_le_bytes());
    }
    hasher.finalize().into()
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn subtree_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves {
        [] => Sha256::digest(EMPTY_TAG).into(),
        [leaf] => *leaf,
        _ => {
            let split = leaves.len().next_power_of_two() / 2;
            let (left, right) = leaves.split_at(split);
            Sha256::new()
                .chain_update(NODE_TAG)
                .chain_update(subtree_root(left))
                .chain_update(subtree_root(right))
                .finalize()
                .into()
        }
    }
}

const LEAF_TAG: &[u8] = b"acct";
const NODE_TAG: &[u8] = b"node";
const EMPTY_TAG: &[u8] = b"fasset-ledger-empty";

mod hex32 {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_state_has_fixed_root() {
        let root = compute_state_root(&BTreeMap::new());
        assert_eq!(root, <[u8; 32]>::from(Sha256::digest(EMPTY_TAG)));
    }

    fn node(left: [u8; 32], right: [u8; 32]) -> [u8; 32] {
        Sha256::new()
            .chain_update(NODE_TAG)
            .chain_update(left)
            .chain_update(right)
            .finalize()
            .into()
    }

    #[test]
    fn unpaired_leaf_is_promoted() {
        let accounts: BTreeMap<AccountId, AccountView> = ["a", "b", "c"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let view = AccountView {
                    balance: i as Amount + 1,
                    ..AccountView::default()
                };
                (name.to_string(), view)
            })
            .collect();
        let leaves: Vec<[u8; 32]> = accounts
            .iter()
            .map(|(account, view)| account_leaf(account, view))
            .collect();
        assert_eq!(compute_state_root(&accounts), node(node(leaves[0], leaves[1]), leaves[2]));

        let single: BTreeMap<_, _> = accounts.into_iter().take(1).collect();
        assert_eq!(compute_state_root(&single), leaves[0]);
    }

    #[test]
    fn root_depends_on_every_field() {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            "alice".to_string(),
            AccountView {
                balance: 10,
                own_vote_power: 10,
                ..AccountView::default()
            },
        );
        let base = compute_state_root(&accounts);
        assert_eq!(base, compute_state_root(&accounts.clone()));

        let mut changed = accounts.clone();
        changed.get_mut("alice").unwrap().received_vote_power = 1;
        assert_ne!(base, compute_state_root(&changed));

        accounts.insert("bob".to_string(), AccountView::default());
        assert_ne!(base, compute_state_root(&accounts));
    }
}
