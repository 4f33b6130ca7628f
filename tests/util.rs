#![allow(dead_code)]
use amr_estimator::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Refinement target that records the global flags it receives, one
/// element per tree.
#[derive(Clone, Debug, Default)]
pub struct FlagRecorder {
    pub counts: Vec<usize>,
    pub seen: Vec<bool>,
}

impl FlagRecorder {
    pub fn single_element_trees(num_trees: usize) -> Self {
        Self {
            counts: vec![1; num_trees],
            seen: Vec::new(),
        }
    }
}

impl RefinementTarget for FlagRecorder {
    fn tree_element_counts(&self) -> Vec<usize> {
        self.counts.clone()
    }

    fn refine_tree(
        &mut self,
        _tree: usize,
        flags: &[bool],
        _min_level: u8,
        _max_level: u8,
    ) -> Result<usize, AmrError> {
        self.seen.extend_from_slice(flags);
        Ok(flags.iter().filter(|&&f| f).count())
    }
}

/// What one rank saw during a cycle.
#[derive(Debug)]
pub struct CycleOutcome {
    pub rank: usize,
    pub element_ids: Vec<u64>,
    pub report: Result<EstimateReport, AmrError>,
    /// Global flags applied on the root.
    pub recorded: Option<Vec<bool>>,
}

/// Run one estimate/refine cycle of a scalar Laplace problem on
/// `partition.num_ranks()` thread ranks. The adjoint (when used) is `field`
/// itself with a unit body load.
pub fn run_cycle(
    global: &GlobalMesh,
    partition: &ElementPartition,
    field: fn(&[f64; 3]) -> f64,
    kind: EstimatorKind,
    options: &AdaptOptions,
) -> Vec<CycleOutcome> {
    ThreadComm::run(partition.num_ranks(), |comm| {
        let rank = comm.rank();
        let mesh = distribute_mesh(global, partition, rank, 1).unwrap();
        let u = mesh.node_vector_from_fn(|x, out| out[0] = field(x)).unwrap();
        let element = LaplaceQuad9::new(1, 1.0);
        let load = BodyLoadQuad9 { load: vec![1.0] };
        let mut target = FlagRecorder::single_element_trees(global.num_elements());
        let is_root = rank == options.root;
        let report = estimate_and_refine(
            &mesh,
            &comm,
            &element,
            &u,
            Some(&u),
            Some(&load as &dyn ElementResidual),
            Some(partition),
            is_root.then_some(&mut target),
            kind,
            options,
        );
        CycleOutcome {
            rank,
            element_ids: mesh.element_ids().to_vec(),
            report,
            recorded: is_root.then(|| target.seen.clone()),
        }
    })
}

/// Element errors of a finished cycle, indexed by global element id.
pub fn errors_by_global(outcomes: &[CycleOutcome], num_elements: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; num_elements];
    for o in outcomes {
        let report = o.report.as_ref().unwrap();
        for (&id, &err) in o.element_ids.iter().zip(&report.element_errors) {
            out[id as usize] = err;
        }
    }
    out
}

/// Element flags of a finished cycle, indexed by global element id.
pub fn flags_by_global(outcomes: &[CycleOutcome], num_elements: usize) -> Vec<bool> {
    let mut out = vec![false; num_elements];
    for o in outcomes {
        let report = o.report.as_ref().unwrap();
        for (&id, &flag) in o.element_ids.iter().zip(&report.flags) {
            out[id as usize] = flag;
        }
    }
    out
}

/// Partition with every rank owning at least one element when possible.
pub fn random_partition(num_elements: usize, num_ranks: usize, seed: u64) -> ElementPartition {
    let mut rng = SmallRng::seed_from_u64(seed);
    let owners = (0..num_elements)
        .map(|e| {
            if e < num_ranks {
                e
            } else {
                rng.gen_range(0..num_ranks)
            }
        })
        .collect();
    ElementPartition::new(owners, num_ranks).unwrap()
}

pub fn assert_close(a: f64, b: f64, rel: f64) {
    let scale = a.abs().max(b.abs()).max(1e-300);
    assert!(
        (a - b).abs() <= rel * scale,
        "values differ: {a} vs {b} (rel tol {rel})"
    );
}

/// A cubic field with no symmetry on the unit square.
pub fn cubic(x: &[f64; 3]) -> f64 {
    x[0].powi(3) + 2.0 * x[1].powi(3) + x[0] * x[1] * x[1] - 0.5 * x[0] * x[0]
}

/// A quartic field; its quadratic interpolants disagree in slope across
/// element boundaries even on uniform meshes.
pub fn quartic(x: &[f64; 3]) -> f64 {
    x[0].powi(4) + 0.5 * x[1].powi(4) + x[0] * x[0] * x[1] * x[1] + x[0]
}
