//! Gather per-rank refinement flags to the root and apply them to the forest.
//!
//! Every rank contributes `(global element id, flag)` records in its local
//! element order. The root walks the partition map in global element order,
//! consuming the next record of the owning rank for each element. A record
//! whose id differs from the element being walked means the local order does
//! not match the order the partition was produced in; that is reported as
//! [`AmrError::PartitionOrderMismatch`] instead of refining the wrong cell.

use crate::algs::collective::{all_agree, gather};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireFlag;
use crate::mesh_error::AmrError;

/// Consecutive tags used by [`refine_from_flags`].
pub const REFINE_TAGS: u16 = 6;

/// Owning rank of every global element.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "RawPartition")]
pub struct ElementPartition {
    owners: Vec<usize>,
    num_ranks: usize,
}

/// Unchecked serialized form of [`ElementPartition`].
#[derive(serde::Deserialize)]
struct RawPartition {
    owners: Vec<usize>,
    num_ranks: usize,
}

impl TryFrom<RawPartition> for ElementPartition {
    type Error = AmrError;

    fn try_from(raw: RawPartition) -> Result<Self, Self::Error> {
        Self::new(raw.owners, raw.num_ranks)
    }
}

impl ElementPartition {
    pub fn new(owners: Vec<usize>, num_ranks: usize) -> Result<Self, AmrError> {
        if let Some((element, &rank)) = owners.iter().enumerate().find(|(_, r)| **r >= num_ranks) {
            return Err(AmrError::PartitionRankOutOfRange {
                element,
                rank,
                size: num_ranks,
            });
        }
        Ok(Self { owners, num_ranks })
    }

    /// Contiguous blocks of (almost) equal size, low ranks first.
    pub fn blocked(num_elements: usize, num_ranks: usize) -> Self {
        let ranks = num_ranks.max(1);
        let owners = (0..num_elements).map(|e| e * ranks / num_elements.max(1)).collect();
        Self {
            owners,
            num_ranks: ranks,
        }
    }

    /// Element `e` goes to rank `e % num_ranks`.
    pub fn round_robin(num_elements: usize, num_ranks: usize) -> Self {
        let ranks = num_ranks.max(1);
        Self {
            owners: (0..num_elements).map(|e| e % ranks).collect(),
            num_ranks: ranks,
        }
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn owner(&self, element: usize) -> Option<usize> {
        self.owners.get(element).copied()
    }

    pub fn owners(&self) -> &[usize] {
        &self.owners
    }

    /// Global elements owned by `rank`, ascending.
    pub fn elements_of(&self, rank: usize) -> impl Iterator<Item = usize> + '_ {
        self.owners
            .iter()
            .enumerate()
            .filter(move |(_, r)| **r == rank)
            .map(|(e, _)| e)
    }

    pub fn counts_per_rank(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_ranks];
        for &r in &self.owners {
            counts[r] += 1;
        }
        counts
    }
}

/// The tree structure refinement is applied to.
pub trait RefinementTarget {
    /// Elements per tree, in tree order. Elements are contiguous per tree.
    fn tree_element_counts(&self) -> Vec<usize>;

    /// Refine one tree with its slice of the global flags.
    fn refine_tree(
        &mut self,
        tree: usize,
        flags: &[bool],
        min_level: u8,
        max_level: u8,
    ) -> Result<usize, AmrError>;
}

/// Reorder gathered per-rank records into global element order.
pub fn reorder_flags(
    per_rank: &[Vec<WireFlag>],
    partition: &ElementPartition,
) -> Result<Vec<bool>, AmrError> {
    if per_rank.len() != partition.num_ranks() {
        return Err(AmrError::PartitionSizeMismatch {
            expected: partition.num_ranks(),
            found: per_rank.len(),
        });
    }
    let mut offsets = vec![0usize; per_rank.len()];
    let mut flags = Vec::with_capacity(partition.len());
    for (element, &rank) in partition.owners().iter().enumerate() {
        let index = offsets[rank];
        let record = per_rank[rank]
            .get(index)
            .ok_or(AmrError::RankElementCountMismatch {
                rank,
                gathered: per_rank[rank].len(),
                partitioned: partition.counts_per_rank()[rank],
            })?;
        if record.element() != element as u64 {
            return Err(AmrError::PartitionOrderMismatch {
                element,
                rank,
                found: record.element(),
            });
        }
        flags.push(record.flag());
        offsets[rank] += 1;
    }
    for (rank, (&consumed, records)) in offsets.iter().zip(per_rank).enumerate() {
        if consumed != records.len() {
            return Err(AmrError::RankElementCountMismatch {
                rank,
                gathered: records.len(),
                partitioned: consumed,
            });
        }
    }
    Ok(flags)
}

/// Slice `flags` per tree and refine each tree; returns the total split count.
pub fn apply_refinement<T: RefinementTarget + ?Sized>(
    target: &mut T,
    flags: &[bool],
    min_level: u8,
    max_level: u8,
) -> Result<usize, AmrError> {
    let counts = target.tree_element_counts();
    let cells: usize = counts.iter().sum();
    if cells != flags.len() {
        return Err(AmrError::FlagCountMismatch {
            flags: flags.len(),
            cells,
        });
    }
    let mut offset = 0;
    let mut refined = 0;
    for (tree, count) in counts.into_iter().enumerate() {
        refined += target.refine_tree(tree, &flags[offset..offset + count], min_level, max_level)?;
        offset += count;
    }
    Ok(refined)
}

/// Root-side inputs of [`refine_from_flags`].
pub struct RootRefinement<'a, T: RefinementTarget + ?Sized> {
    pub partition: &'a ElementPartition,
    pub target: &'a mut T,
}

/// Gather the local flags to `root`, reorder them through the partition map
/// and refine the target there. Collective.
///
/// `element_ids[i]` is the global id of local element `i`. Returns the number
/// of cells split on the root and `None` elsewhere. A failure on the root is
/// reported on every rank.
#[allow(clippy::too_many_arguments)]
pub fn refine_from_flags<C, T>(
    comm: &C,
    tag: CommTag,
    root: usize,
    element_ids: &[u64],
    flags: &[bool],
    on_root: Option<RootRefinement<'_, T>>,
    min_level: u8,
    max_level: u8,
) -> Result<Option<usize>, AmrError>
where
    C: Communicator,
    T: RefinementTarget + ?Sized,
{
    if element_ids.len() != flags.len() {
        return Err(AmrError::SliceLengthMismatch {
            expected: element_ids.len(),
            found: flags.len(),
        });
    }
    let records: Vec<WireFlag> = element_ids
        .iter()
        .zip(flags)
        .map(|(&id, &flag)| WireFlag::new(id, flag))
        .collect();
    let gathered = gather(comm, root, tag, &records)?;

    let outcome = match (gathered, on_root) {
        (Some(per_rank), Some(RootRefinement { partition, target })) => {
            log::debug!(
                "[rank {root}] reordering {} gathered flags",
                per_rank.iter().map(Vec::len).sum::<usize>()
            );
            reorder_flags(&per_rank, partition)
                .and_then(|global| apply_refinement(target, &global, min_level, max_level))
                .map(Some)
        }
        (Some(_), None) => Err(AmrError::MissingRootInput("partition and refinement target")),
        (None, _) => Ok(None),
    };

    let ok = all_agree(comm, tag.offset(2), outcome.is_ok())?;
    match outcome {
        Err(err) => Err(err),
        Ok(_) if !ok => Err(AmrError::CommError {
            neighbor: root,
            source: "refinement failed on the root rank".into(),
        }),
        Ok(refined) => Ok(refined),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;

    #[derive(Default)]
    struct Recorder {
        counts: Vec<usize>,
        seen: Vec<(usize, Vec<bool>)>,
    }

    impl RefinementTarget for Recorder {
        fn tree_element_counts(&self) -> Vec<usize> {
            self.counts.clone()
        }

        fn refine_tree(
            &mut self,
            tree: usize,
            flags: &[bool],
            _min_level: u8,
            _max_level: u8,
        ) -> Result<usize, AmrError> {
            self.seen.push((tree, flags.to_vec()));
            Ok(flags.iter().filter(|f| **f).count())
        }
    }

    fn records(ids: &[u64], flags: &[bool]) -> Vec<WireFlag> {
        ids.iter().zip(flags).map(|(&i, &f)| WireFlag::new(i, f)).collect()
    }

    #[test]
    fn partition_validation_and_counts() {
        assert!(matches!(
            ElementPartition::new(vec![0, 3], 2),
            Err(AmrError::PartitionRankOutOfRange { element: 1, rank: 3, size: 2 })
        ));
        let p = ElementPartition::blocked(5, 2);
        assert_eq!(p.owners(), &[0, 0, 0, 1, 1]);
        assert_eq!(p.counts_per_rank(), vec![3, 2]);
        assert_eq!(ElementPartition::round_robin(5, 2).elements_of(1).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn reorder_interleaved_partition() {
        let p = ElementPartition::new(vec![1, 0, 1, 0], 2).unwrap();
        let per_rank = vec![
            records(&[1, 3], &[true, false]),
            records(&[0, 2], &[false, true]),
        ];
        assert_eq!(reorder_flags(&per_rank, &p).unwrap(), vec![false, true, true, false]);
    }

    #[test]
    fn reorder_detects_local_order_violation() {
        let p = ElementPartition::new(vec![0, 0], 1).unwrap();
        let per_rank = vec![records(&[1, 0], &[true, false])];
        assert!(matches!(
            reorder_flags(&per_rank, &p),
            Err(AmrError::PartitionOrderMismatch { element: 0, rank: 0, found: 1 })
        ));
    }

    #[test]
    fn reorder_detects_count_mismatch() {
        let p = ElementPartition::new(vec![0, 1], 2).unwrap();
        let per_rank = vec![records(&[0], &[true]), records(&[1, 2], &[true, true])];
        assert!(matches!(
            reorder_flags(&per_rank, &p),
            Err(AmrError::RankElementCountMismatch { rank: 1, gathered: 2, partitioned: 1 })
        ));
    }

    #[test]
    fn apply_slices_per_tree() {
        let mut target = Recorder {
            counts: vec![2, 1, 3],
            ..Default::default()
        };
        let flags = [true, false, true, false, true, true];
        assert_eq!(apply_refinement(&mut target, &flags, 0, 4).unwrap(), 4);
        assert_eq!(target.seen[2], (2, vec![false, true, true]));
        assert!(matches!(
            apply_refinement(&mut target, &flags[..5], 0, 4),
            Err(AmrError::FlagCountMismatch { flags: 5, cells: 6 })
        ));
    }

    #[test]
    fn gathered_flags_reach_the_root_tree() {
        let partition = ElementPartition::new(vec![2, 0, 1, 2, 0], 3).unwrap();
        let global = [true, false, false, true, true];
        let out = ThreadComm::run(3, |comm| {
            let ids: Vec<u64> = partition.elements_of(comm.rank()).map(|e| e as u64).collect();
            let flags: Vec<bool> = ids.iter().map(|&e| global[e as usize]).collect();
            let mut target = Recorder {
                counts: vec![5],
                ..Default::default()
            };
            let root = (comm.rank() == 0).then(|| RootRefinement {
                partition: &partition,
                target: &mut target,
            });
            let refined =
                refine_from_flags(&comm, CommTag::new(0x0C00), 0, &ids, &flags, root, 0, 4).unwrap();
            (refined, target.seen)
        });
        assert_eq!(out[0].0, Some(3));
        assert_eq!(out[0].1, vec![(0, global.to_vec())]);
        assert_eq!(out[1].0, None);
    }

    #[test]
    fn root_failure_is_seen_everywhere() {
        let partition = ElementPartition::new(vec![0, 1], 2).unwrap();
        let out = ThreadComm::run(2, |comm| {
            // local order is fine but the tree has the wrong size
            let ids = [comm.rank() as u64];
            let mut target = Recorder {
                counts: vec![3],
                ..Default::default()
            };
            let root = (comm.rank() == 0).then(|| RootRefinement {
                partition: &partition,
                target: &mut target,
            });
            refine_from_flags(&comm, CommTag::new(0x0C00), 0, &ids, &[true], root, 0, 4).is_err()
        });
        assert_eq!(out, vec![true, true]);
    }
}
