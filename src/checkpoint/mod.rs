use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::LedgerError, SequenceIndex};

/// One historical record: `value` took effect at `index`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint<V> {
    pub index: SequenceIndex,
    pub value: V,
}

/// Append-only, per-key history of checkpoints.
///
/// Histories are strictly increasing in index. A lookup at index `I` yields the
/// value of the last checkpoint recorded at or before `I`, or `V::default()`
/// when there is none.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointStore<K: Ord, V> {
    histories: BTreeMap<K, Vec<Checkpoint<V>>>,
    /// Open while a batch is in flight; `None` otherwise.
    #[serde(skip)]
    journal: Option<Vec<Undo<K, V>>>,
}

/// How to reverse one `write_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Undo<K, V> {
    /// The write appended a new checkpoint.
    Pop(K),
    /// The write replaced the value of the latest checkpoint.
    Restore(K, V),
}

impl<K: Ord, V> Default for CheckpointStore<K, V> {
    fn default() -> Self {
        Self {
            histories: BTreeMap::new(),
            journal: None,
        }
    }
}

impl<K, V> CheckpointStore<K, V>
where
    K: Ord + Clone,
    V: Clone + Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if a write at `index` would land behind the latest checkpoint of `key`.
    pub fn ensure_writable(&self, key: &K, index: SequenceIndex) -> Result<(), LedgerError> {
        match self.latest_index(key) {
            Some(latest) if index < latest => Err(LedgerError::NonMonotonicIndex {
                latest,
                attempted: index,
            }),
            _ => Ok(()),
        }
    }

    /// Records `value` for `key` at `index`.
    ///
    /// A write at the latest recorded index replaces that checkpoint, so several
    /// mutations within one index collapse into a single record.
    pub fn write_at(&mut self, key: &K, index: SequenceIndex, value: V) -> Result<(), LedgerError> {
        self.ensure_writable(key, index)?;
        let history = self.histories.entry(key.clone()).or_default();
        let undo = if let Some(last) = history.last_mut().filter(|cp| cp.index == index) {
            Undo::Restore(key.clone(), std::mem::replace(&mut last.value, value))
        } else {
            history.push(Checkpoint { index, value });
            Undo::Pop(key.clone())
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.push(undo);
        }
        Ok(())
    }

    /// Starts recording writes so they can be reverted with [`Self::rollback`].
    pub fn begin(&mut self) {
        self.journal = Some(Vec::new());
    }

    /// Keeps every write since [`Self::begin`] and stops recording.
    pub fn commit(&mut self) {
        self.journal = None;
    }

    /// Reverts every write since [`Self::begin`], newest first.
    pub fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Pop(key) => {
                    let emptied = match self.histories.get_mut(&key) {
                        Some(history) => {
                            history.pop();
                            history.is_empty()
                        }
                        None => false,
                    };
                    if emptied {
                        self.histories.remove(&key);
                    }
                }
                Undo::Restore(key, value) => {
                    if let Some(last) = self.histories.get_mut(&key).and_then(|h| h.last_mut()) {
                        last.value = value;
                    }
                }
            }
        }
    }

    /// Borrowing point-in-time lookup.
    pub fn get_at(&self, key: &K, index: SequenceIndex) -> Option<&V> {
        let history = self.histories.get(key)?;
        let pos = history.partition_point(|cp| cp.index <= index);
        if pos == 0 {
            return None;
        }
        Some(&history[pos - 1].value)
    }

    pub fn read_at(&self, key: &K, index: SequenceIndex) -> V {
        self.get_at(key, index).cloned().unwrap_or_default()
    }

    pub fn get_latest(&self, key: &K) -> Option<&V> {
        self.histories
            .get(key)
            .and_then(|history| history.last())
            .map(|cp| &cp.value)
    }

    pub fn read_latest(&self, key: &K) -> V {
        self.get_latest(key).cloned().unwrap_or_default()
    }

    pub fn latest_index(&self, key: &K) -> Option<SequenceIndex> {
        self.histories
            .get(key)
            .and_then(|history| history.last())
            .map(|cp| cp.index)
    }

    pub fn history(&self, key: &K) -> &[Checkpoint<V>] {
        self.histories.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.histories.keys()
    }
}
