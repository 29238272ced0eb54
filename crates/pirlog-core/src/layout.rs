//! Frozen bucket layouts
//!
//! A layout lists one entry ID per table slot, `bucket * depth + slot`, with
//! `EMPTY_SLOT_ID` for free slots. Layouts are immutable once built and are
//! handed to replicas in equal contiguous slices, one slice per group.

use std::sync::Arc;

use thiserror::Error;

use crate::constants::EMPTY_SLOT_ID;
use crate::cuckoo::CuckooTable;
use crate::wire::LayoutStatus;
use crate::EntryId;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitError {
    #[error("Layout of {len} slots cannot be split {num_split} ways")]
    InvalidNumSplit { len: usize, num_split: u64 },

    #[error("Slice {index} out of range for a {num_split}-way split")]
    InvalidIndex { index: u64, num_split: u64 },
}

impl From<SplitError> for LayoutStatus {
    fn from(err: SplitError) -> Self {
        match err {
            SplitError::InvalidNumSplit { .. } => LayoutStatus::InvalidNumsplit,
            SplitError::InvalidIndex { .. } => LayoutStatus::InvalidIndex,
        }
    }
}

/// Ordered entry IDs of a frozen table. Cloning shares the ID list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    ids: Arc<[EntryId]>,
}

impl Layout {
    /// Freeze the current placement of `table`
    pub fn from_table(table: &CuckooTable<EntryId>) -> Self {
        Self::from_table_where(table, |_| true)
    }

    /// Freeze `table`, leaving the slot of every ID rejected by `keep` empty
    pub fn from_table_where(table: &CuckooTable<EntryId>, keep: impl Fn(EntryId) -> bool) -> Self {
        let ids: Vec<EntryId> = table
            .slots()
            .map(|slot| match slot {
                Some(entry) if keep(entry.data) => entry.data,
                _ => EMPTY_SLOT_ID,
            })
            .collect();
        Self::from_ids(ids)
    }

    pub fn from_ids(ids: Vec<EntryId>) -> Self {
        Self { ids: ids.into() }
    }

    /// A layout of `len` empty slots
    pub fn empty(len: usize) -> Self {
        Self::from_ids(vec![EMPTY_SLOT_ID; len])
    }

    pub fn ids(&self) -> &[EntryId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Non-empty IDs in slot order
    pub fn occupied(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.ids.iter().copied().filter(|&id| id != EMPTY_SLOT_ID)
    }

    /// Slice `index` of `num_split` equal contiguous slices
    pub fn split(&self, index: u64, num_split: u64) -> Result<&[EntryId], SplitError> {
        let len = self.ids.len();
        if num_split == 0 || len as u64 % num_split != 0 {
            return Err(SplitError::InvalidNumSplit { len, num_split });
        }
        if index >= num_split {
            return Err(SplitError::InvalidIndex { index, num_split });
        }
        let chunk = len / num_split as usize;
        let start = index as usize * chunk;
        Ok(&self.ids[start..start + chunk])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cuckoo::Entry;

    #[test]
    fn test_from_table_positions() {
        let mut table = CuckooTable::with_seed(4, 2, 8, 1);
        table.insert(Entry::new(1, 1, 10)).unwrap();
        table.insert(Entry::new(3, 3, 11)).unwrap();
        table.insert(Entry::new(3, 3, 12)).unwrap();

        let layout = Layout::from_table(&table);
        assert_eq!(layout.ids(), &[0, 0, 10, 0, 0, 0, 11, 12]);
        assert_eq!(layout.occupied().collect::<Vec<_>>(), vec![10, 11, 12]);
    }

    #[test]
    fn test_from_table_where_hides_rejected() {
        let mut table = CuckooTable::with_seed(4, 2, 8, 1);
        table.insert(Entry::new(1, 1, 10)).unwrap();
        table.insert(Entry::new(3, 3, 11)).unwrap();

        let layout = Layout::from_table_where(&table, |id| id != 11);
        assert_eq!(layout.ids(), &[0, 0, 10, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_split() {
        let layout = Layout::from_ids((1..=8).collect());
        assert_eq!(layout.split(0, 1).unwrap(), layout.ids());
        assert_eq!(layout.split(0, 2).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(layout.split(1, 2).unwrap(), &[5, 6, 7, 8]);
        assert_eq!(layout.split(3, 4).unwrap(), &[7, 8]);
    }

    #[test]
    fn test_split_errors() {
        let layout = Layout::empty(8);
        assert_eq!(
            layout.split(0, 3),
            Err(SplitError::InvalidNumSplit { len: 8, num_split: 3 })
        );
        assert!(matches!(
            layout.split(0, 0),
            Err(SplitError::InvalidNumSplit { .. })
        ));
        assert_eq!(
            layout.split(2, 2),
            Err(SplitError::InvalidIndex { index: 2, num_split: 2 })
        );
        assert_eq!(
            LayoutStatus::from(SplitError::InvalidIndex { index: 2, num_split: 2 }),
            LayoutStatus::InvalidIndex
        );
    }
}
