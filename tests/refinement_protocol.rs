mod util;

use amr_estimator::adapt::refinement::{RootRefinement, refine_from_flags};
use amr_estimator::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use util::*;

const TAG: CommTag = CommTag::new(0x3000);

/// Scatter `global_flags` through `partition`, gather them back to rank 0
/// and return what the root applied.
fn round_trip(global_flags: &[bool], partition: &ElementPartition) -> Vec<bool> {
    let out = ThreadComm::run(partition.num_ranks(), |comm| {
        let rank = comm.rank();
        let ids: Vec<u64> = partition.elements_of(rank).map(|e| e as u64).collect();
        let flags: Vec<bool> = ids.iter().map(|&e| global_flags[e as usize]).collect();
        let mut target = FlagRecorder::single_element_trees(partition.len());
        let on_root = (rank == 0).then(|| RootRefinement {
            partition,
            target: &mut target,
        });
        let refined = refine_from_flags(&comm, TAG, 0, &ids, &flags, on_root, 0, 4).unwrap();
        (refined, target.seen)
    });
    let flagged = global_flags.iter().filter(|&&f| f).count();
    assert_eq!(out[0].0, Some(flagged));
    assert!(out[1..].iter().all(|(r, seen)| r.is_none() && seen.is_empty()));
    out.into_iter().next().map(|(_, seen)| seen).unwrap_or_default()
}

#[test]
fn random_flags_survive_the_gather_for_every_rank_count() {
    let mut rng = SmallRng::seed_from_u64(0x5eed);
    for ranks in 1..=5 {
        for trial in 0..4 {
            let n = rng.gen_range(ranks..40);
            let flags: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.3)).collect();
            let partition = random_partition(n, ranks, 100 * ranks as u64 + trial);
            assert_eq!(round_trip(&flags, &partition), flags);
        }
    }
}

#[test]
fn blocked_and_round_robin_partitions_agree() {
    let flags: Vec<bool> = (0..17).map(|i| i % 3 == 0).collect();
    assert_eq!(round_trip(&flags, &ElementPartition::blocked(17, 4)), flags);
    assert_eq!(round_trip(&flags, &ElementPartition::round_robin(17, 4)), flags);
}

#[test]
fn ranks_without_elements_still_take_part() {
    let partition = ElementPartition::new(vec![2, 2, 0, 2], 4).unwrap();
    let flags = vec![true, false, false, true];
    assert_eq!(round_trip(&flags, &partition), flags);
}

#[test]
fn out_of_order_local_elements_fail_on_all_ranks() {
    let partition = ElementPartition::new(vec![1, 0, 1], 2).unwrap();
    let out = ThreadComm::run(2, |comm| {
        let rank = comm.rank();
        let mut ids: Vec<u64> = partition.elements_of(rank).map(|e| e as u64).collect();
        ids.reverse();
        let flags = vec![true; ids.len()];
        let mut target = FlagRecorder::single_element_trees(3);
        let on_root = (rank == 0).then(|| RootRefinement {
            partition: &partition,
            target: &mut target,
        });
        refine_from_flags(&comm, TAG, 0, &ids, &flags, on_root, 0, 4)
    });
    assert!(matches!(
        out[0],
        Err(AmrError::PartitionOrderMismatch { element: 0, rank: 1, found: 2 })
    ));
    assert!(out[1].is_err());
}

#[test]
fn forest_refinement_through_the_protocol() {
    let partition = ElementPartition::round_robin(8, 3);
    let flags: Vec<bool> = (0..8).map(|i| i == 2 || i == 5).collect();
    let out = ThreadComm::run(3, |comm| {
        let rank = comm.rank();
        let ids: Vec<u64> = partition.elements_of(rank).map(|e| e as u64).collect();
        let local: Vec<bool> = ids.iter().map(|&e| flags[e as usize]).collect();
        // two trees of four level-1 cells
        let mut forest =
            QuadForest::from_trees(vec![Tree::uniform(1).unwrap(), Tree::uniform(1).unwrap()]);
        let on_root = (rank == 0).then(|| RootRefinement {
            partition: &partition,
            target: &mut forest,
        });
        let refined = refine_from_flags(&comm, TAG, 0, &ids, &local, on_root, 1, 3).unwrap();
        (refined, forest.tree_element_counts())
    });
    assert_eq!(out[0].0, Some(2));
    assert_eq!(out[0].1, vec![7, 7]);
    assert_eq!(out[2].1, vec![4, 4]);
}
