//! Ownership metadata for mesh nodes.
//!
//! The [`NodeOwnership`] map records, for every local independent node, its
//! global id and owning rank. A node owned by another rank is a ghost here.

use crate::mesh_error::AmrError;
use std::collections::{BTreeMap, HashMap};

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OwnershipEntry {
    pub global: u64,
    pub owner: usize,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct NodeOwnership {
    rank: usize,
    entries: Vec<OwnershipEntry>,
}

impl NodeOwnership {
    /// Build the map for `rank` from `(global id, owner)` pairs in local order.
    ///
    /// Global ids must be unique.
    pub fn new(rank: usize, entries: Vec<OwnershipEntry>) -> Result<Self, AmrError> {
        let mut seen = HashMap::with_capacity(entries.len());
        for (local, entry) in entries.iter().enumerate() {
            if let Some(first) = seen.insert(entry.global, local) {
                return Err(AmrError::InvalidMesh(format!(
                    "global node {} appears at local indices {first} and {local}",
                    entry.global
                )));
            }
        }
        Ok(Self { rank, entries })
    }

    /// Rank this map was built for.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of local independent nodes (owned + ghost).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, local: usize) -> Option<OwnershipEntry> {
        self.entries.get(local).copied()
    }

    pub fn global_id(&self, local: usize) -> Option<u64> {
        self.entry(local).map(|e| e.global)
    }

    pub fn owner(&self, local: usize) -> Option<usize> {
        self.entry(local).map(|e| e.owner)
    }

    /// Returns true if `local` is owned by another rank.
    pub fn is_ghost(&self, local: usize) -> bool {
        self.owner(local).is_some_and(|owner| owner != self.rank)
    }

    /// Local indices of the nodes this rank owns.
    pub fn owned(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.owner == self.rank)
            .map(|(i, _)| i)
    }

    /// Ghost nodes grouped by owning rank, each group sorted by global id.
    pub fn ghosts_by_owner(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (local, entry) in self.entries.iter().enumerate() {
            if entry.owner != self.rank {
                groups.entry(entry.owner).or_default().push(local);
            }
        }
        for group in groups.values_mut() {
            group.sort_unstable_by_key(|&local| self.entries[local].global);
        }
        groups
    }

    /// Map from global id to local index for owned nodes.
    pub fn owned_index(&self) -> HashMap<u64, usize> {
        self.owned()
            .map(|local| (self.entries[local].global, local))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(global: u64, owner: usize) -> OwnershipEntry {
        OwnershipEntry { global, owner }
    }

    #[test]
    fn ghosts_grouped_and_sorted() {
        let own = NodeOwnership::new(
            1,
            vec![entry(9, 0), entry(4, 1), entry(2, 0), entry(7, 2), entry(5, 1)],
        )
        .unwrap();
        assert_eq!(own.owned().collect::<Vec<_>>(), vec![1, 4]);
        let ghosts = own.ghosts_by_owner();
        assert_eq!(ghosts[&0], vec![2, 0]);
        assert_eq!(ghosts[&2], vec![3]);
        assert!(own.is_ghost(0) && !own.is_ghost(1));
        assert_eq!(own.owned_index()[&5], 4);
    }

    #[test]
    fn duplicate_global_ids_rejected() {
        let err = NodeOwnership::new(0, vec![entry(3, 0), entry(3, 0)]).unwrap_err();
        assert!(matches!(err, AmrError::InvalidMesh(_)));
    }
}
