mod util;

use amr_estimator::adapt::weights::compute_node_weights;
use amr_estimator::data::node_distribute::NodeDistribute;
use amr_estimator::mesh_generation::coarse_fine_pair;
use amr_estimator::prelude::*;
use util::*;

const TAG: CommTag = CommTag::new(0x4000);

#[test]
fn constrained_weights_are_conserved_across_ranks() {
    let global = coarse_fine_pair().unwrap();
    let partition = ElementPartition::new(vec![0, 1, 1], 2).unwrap();
    let out = ThreadComm::run(2, |comm| {
        let mesh = distribute_mesh(&global, &partition, comm.rank(), 1).unwrap();
        let plan = NodeDistribute::new(&comm, mesh.ownership(), TAG).unwrap();
        let w = compute_node_weights(&comm, &mesh, &plan, TAG.offset(8)).unwrap();
        let owned: f64 = mesh.ownership().owned().map(|n| w.block(n)[0]).sum();
        // dependent weights are interpolated from their parents
        let dependent: Vec<f64> = (mesh.num_independent()..mesh.num_nodes())
            .map(|n| w.block(n)[0])
            .collect();
        (owned, dependent)
    });
    let total: f64 = out.iter().map(|(owned, _)| owned).sum();
    assert_close(total, 27.0, 1e-14);
    assert!(out[0].1.is_empty());
    assert_eq!(out[1].1.len(), 2);
    assert!(out[1].1.iter().all(|&w| w > 0.0));
}

#[test]
fn hanging_mesh_estimate_is_independent_of_the_partition() {
    let global = coarse_fine_pair().unwrap();
    let options = AdaptOptions {
        min_level: 0,
        max_level: 4,
        ..Default::default()
    };
    let serial = run_cycle(
        &global,
        &ElementPartition::blocked(3, 1),
        cubic,
        EstimatorKind::StrainEnergy,
        &options,
    );
    let serial_report = serial[0].report.as_ref().unwrap();
    assert!(serial_report.total_error.is_finite());
    assert_eq!(serial_report.unreliable_elements, 0);

    for owners in [vec![0, 1, 1], vec![1, 0, 1], vec![0, 1, 2]] {
        let ranks = owners.iter().max().map_or(1, |m| m + 1);
        let partition = ElementPartition::new(owners, ranks).unwrap();
        let out = run_cycle(&global, &partition, cubic, EstimatorKind::StrainEnergy, &options);
        for (a, b) in errors_by_global(&out, 3).iter().zip(&serial_report.element_errors) {
            assert_close(*a, *b, 1e-10);
        }
        assert_eq!(flags_by_global(&out, 3), serial_report.flags);
    }
}

#[test]
fn dependent_values_follow_their_parents() {
    let global = coarse_fine_pair().unwrap();
    let partition = ElementPartition::blocked(3, 1);
    let mesh = distribute_mesh(&global, &partition, 0, 1).unwrap();
    // quadratic along the shared edge: the constraint reproduces it exactly
    let u = mesh
        .node_vector_from_fn(|x, out| out[0] = 1.0 + x[1] - 2.0 * x[1] * x[1])
        .unwrap();
    for d in 0..mesh.num_dependent() {
        let node = mesh.num_independent() + d;
        let y = [0.25, 0.75][d];
        assert_close(u.block(node)[0], 1.0 + y - 2.0 * y * y, 1e-14);
    }
}
