mod util;

use amr_estimator::adapt::weights::{check_orphans, compute_node_weights};
use amr_estimator::data::node_distribute::NodeDistribute;
use amr_estimator::mesh_generation::structured_quad9;
use amr_estimator::prelude::*;
use proptest::prelude::*;
use util::random_partition;

const TAG: CommTag = CommTag::new(0x2000);

/// Owned weights per rank as `(global id, weight)`.
fn owned_weights(global: &GlobalMesh, partition: &ElementPartition) -> Vec<Vec<(u64, f64)>> {
    ThreadComm::run(partition.num_ranks(), |comm| {
        let mesh = distribute_mesh(global, partition, comm.rank(), 1).unwrap();
        let plan = NodeDistribute::new(&comm, mesh.ownership(), TAG).unwrap();
        let w = compute_node_weights(&comm, &mesh, &plan, TAG.offset(8)).unwrap();
        check_orphans(&comm, &mesh, &w, TAG.offset(12)).unwrap();
        // ghosts hold the owner's total too
        for node in 0..mesh.num_independent() {
            assert!(w.block(node)[0] >= 1.0);
        }
        mesh.ownership()
            .owned()
            .map(|n| (mesh.ownership().global_id(n).unwrap(), w.block(n)[0]))
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn weights_count_referencing_elements(
        nx in 1usize..4,
        ny in 1usize..4,
        ranks in 1usize..4,
        seed in any::<u64>(),
    ) {
        let global = structured_quad9(nx, ny, [0.0, 1.0], [0.0, 2.0]).unwrap();
        let ranks = ranks.min(global.num_elements());
        let partition = random_partition(global.num_elements(), ranks, seed);

        let mut expected = vec![0.0; global.num_nodes()];
        for nodes in &global.conn {
            for &n in nodes {
                expected[n] += 1.0;
            }
        }

        let per_rank = owned_weights(&global, &partition);
        let mut seen = vec![false; global.num_nodes()];
        let mut total = 0.0;
        for owned in &per_rank {
            for &(id, w) in owned {
                prop_assert!(!seen[id as usize], "node {} owned twice", id);
                seen[id as usize] = true;
                prop_assert_eq!(w, expected[id as usize]);
                total += w;
            }
        }
        prop_assert!(seen.iter().all(|&s| s));
        prop_assert_eq!(total, (9 * global.num_elements()) as f64);
    }
}
