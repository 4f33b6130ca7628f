//! Error estimation and refinement driven by recovered derivatives.
//!
//! One AMR cycle runs, on every rank:
//! 1. nodal weights ([`weights`]) and the orphan check,
//! 2. derivative recovery ([`recovery`]) for the solution (and the adjoint),
//! 3. per-element enrichment fits ([`reconstruction`]) and indicators ([`indicators`]),
//! 4. global mean-threshold marking,
//! 5. the flag gather and tree refinement on the root ([`refinement`]).
//!
//! [`estimate_and_refine`] strings these together.

pub mod indicators;
pub mod reconstruction;
pub mod recovery;
pub mod refinement;
pub mod weights;

use crate::algs::collective::{all_agree, allreduce_sum_f64, allreduce_sum_usize};
use crate::algs::communicator::{CommTag, Communicator};
use crate::data::local_mesh::LocalMesh;
use crate::data::node_distribute::{NodeDistribute, PLAN_TAGS, TRANSFER_TAGS};
use crate::data::node_vector::NodeVector;
use crate::forest::MAX_LEVEL;
use crate::mesh_error::AmrError;
use crate::physics::fe::ElementResidual;
use itertools::Itertools;
use indicators::{Field, Indicator, local_errors, mark_elements};
use refinement::{ElementPartition, REFINE_TAGS, RefinementTarget, RootRefinement};

/// Tunables of one estimate/refine cycle.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AdaptOptions {
    /// Every cell is refined to at least this level.
    pub min_level: u8,
    /// No cell is refined beyond this level.
    pub max_level: u8,
    /// Rank that holds the partition map and the forest.
    pub root: usize,
    /// Singular values below `rcond * σ_max` are dropped in the enrichment fit.
    pub rcond: f64,
    /// First communication tag; a cycle uses [`AdaptCommTags::SPAN`] tags from here.
    pub tag_base: u16,
    /// Time passed to residual evaluation.
    pub time: f64,
}

impl Default for AdaptOptions {
    fn default() -> Self {
        Self {
            min_level: 2,
            max_level: MAX_LEVEL,
            root: 0,
            rcond: 1e-10,
            tag_base: 0xA000,
            time: 0.0,
        }
    }
}

impl AdaptOptions {
    pub fn validate(&self) -> Result<(), AmrError> {
        if self.min_level > self.max_level || self.max_level > MAX_LEVEL {
            return Err(AmrError::InvalidLevels {
                min: self.min_level,
                max: self.max_level,
                limit: MAX_LEVEL,
            });
        }
        if !(self.rcond.is_finite() && self.rcond >= 0.0) {
            return Err(AmrError::InvalidOption(format!(
                "rcond must be finite and non-negative, got {}",
                self.rcond
            )));
        }
        if !self.time.is_finite() {
            return Err(AmrError::InvalidOption("time must be finite".into()));
        }
        Ok(())
    }
}

/// Which error estimate drives the refinement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EstimatorKind {
    /// Difference in strain energy between the enriched and the native solution.
    #[default]
    StrainEnergy,
    /// Goal-oriented estimate weighted by the adjoint enrichment.
    Adjoint,
}

/// Disjoint tag ranges for the collective phases of one cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdaptCommTags {
    pub inputs: CommTag,
    pub plan: CommTag,
    pub solution: CommTag,
    pub adjoint: CommTag,
    pub weights: CommTag,
    pub orphans: CommTag,
    pub derivs: CommTag,
    pub adjoint_derivs: CommTag,
    pub indicator: CommTag,
    pub error_total: CommTag,
    pub element_count: CommTag,
    pub flagged: CommTag,
    pub refine: CommTag,
}

impl AdaptCommTags {
    /// Tags consumed by one cycle.
    pub const SPAN: u16 = 6 * 4 + PLAN_TAGS + 8 * TRANSFER_TAGS + REFINE_TAGS;

    pub fn from_base(base: u16) -> Self {
        let base = CommTag::new(base);
        let mut next = 0u16;
        let mut take = |n: u16| {
            let tag = base.offset(next);
            next += n;
            tag
        };
        Self {
            inputs: take(4),
            plan: take(PLAN_TAGS),
            solution: take(TRANSFER_TAGS),
            adjoint: take(TRANSFER_TAGS),
            weights: take(2 * TRANSFER_TAGS),
            orphans: take(4),
            derivs: take(2 * TRANSFER_TAGS),
            adjoint_derivs: take(2 * TRANSFER_TAGS),
            indicator: take(4),
            error_total: take(4),
            element_count: take(4),
            flagged: take(4),
            refine: take(REFINE_TAGS),
        }
    }
}

/// Outcome of [`estimate_and_refine`] on one rank.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize)]
pub struct EstimateReport {
    /// Sum of all element errors, identical on every rank.
    pub total_error: f64,
    /// Global element count.
    pub total_elements: usize,
    /// Mean error; elements at or above it are flagged.
    pub threshold: f64,
    /// Global number of flagged elements.
    pub elements_flagged: usize,
    /// Cells split by the refinement, reported on the root only.
    pub cells_refined: Option<usize>,
    /// Local elements whose enrichment fit was degenerate.
    pub unreliable_elements: usize,
    /// Error of every local element, in local order.
    pub element_errors: Vec<f64>,
    /// Refinement flag of every local element, in local order.
    pub flags: Vec<bool>,
}

/// Checks that only need local data; a failure anywhere aborts every rank.
#[allow(clippy::too_many_arguments)]
fn check_inputs<C: Communicator, T: ?Sized>(
    mesh: &LocalMesh,
    comm: &C,
    element: &dyn ElementResidual,
    solution: &NodeVector,
    adjoint: Option<&NodeVector>,
    partition: Option<&ElementPartition>,
    forest: Option<&T>,
    kind: EstimatorKind,
    options: &AdaptOptions,
) -> Result<(), AmrError> {
    options.validate()?;
    if options.root >= comm.size() {
        return Err(AmrError::InvalidOption(format!(
            "root rank {} outside a communicator of {} ranks",
            options.root,
            comm.size()
        )));
    }
    let vpn = mesh.vars_per_node();
    if element.vars_per_node() != vpn {
        return Err(AmrError::VarsPerNodeMismatch {
            mesh: vpn,
            element: element.vars_per_node(),
        });
    }
    let expected = mesh.num_nodes() * vpn;
    let vectors = std::iter::once(solution).chain(adjoint);
    for v in vectors {
        if v.stride() != vpn || v.as_slice().len() != expected {
            return Err(AmrError::SliceLengthMismatch {
                expected,
                found: v.as_slice().len(),
            });
        }
    }
    if kind == EstimatorKind::Adjoint && adjoint.is_none() {
        return Err(AmrError::InvalidOption(
            "the adjoint estimator needs an adjoint solution".into(),
        ));
    }
    if comm.rank() == options.root {
        let partition = partition.ok_or(AmrError::MissingRootInput("element partition"))?;
        if forest.is_none() {
            return Err(AmrError::MissingRootInput("refinement target"));
        }
        if partition.num_ranks() != comm.size() {
            return Err(AmrError::PartitionSizeMismatch {
                expected: comm.size(),
                found: partition.num_ranks(),
            });
        }
    }
    Ok(())
}

/// Copy of `values` with owner values on every ghost and fresh dependent values.
fn synchronized<C: Communicator>(
    comm: &C,
    mesh: &LocalMesh,
    plan: &NodeDistribute,
    tag: CommTag,
    values: &NodeVector,
) -> Result<NodeVector, AmrError> {
    let mut v = values.clone();
    plan.forward(comm, tag, &mut v)?;
    mesh.constraints().set_dependent_values(&mut v)?;
    Ok(v)
}

/// Estimate the error of `solution`, flag elements at or above the mean and
/// refine the forest on the root. Collective over `comm`.
///
/// `partition` and `forest` are only read on `options.root`. `adjoint` is
/// required for [`EstimatorKind::Adjoint`]; `aux` is an extra element
/// residual (e.g. a body load) included in the adjoint indicator.
///
/// Any fatal error (bad inputs on any rank, orphaned nodes, inconsistent
/// partition map on the root) is returned on every rank.
#[allow(clippy::too_many_arguments)]
pub fn estimate_and_refine<C, E, T>(
    mesh: &LocalMesh,
    comm: &C,
    element: &E,
    solution: &NodeVector,
    adjoint: Option<&NodeVector>,
    aux: Option<&dyn ElementResidual>,
    partition: Option<&ElementPartition>,
    forest: Option<&mut T>,
    kind: EstimatorKind,
    options: &AdaptOptions,
) -> Result<EstimateReport, AmrError>
where
    C: Communicator,
    E: ElementResidual,
    T: RefinementTarget + ?Sized,
{
    let rank = comm.rank();
    let tags = AdaptCommTags::from_base(options.tag_base);

    let checked = check_inputs(
        mesh,
        comm,
        element,
        solution,
        adjoint,
        partition,
        forest.as_deref(),
        kind,
        options,
    );
    if let Err(err) = &checked {
        log::error!("[rank {rank}] invalid estimator input: {err}");
    }
    let ok = all_agree(comm, tags.inputs, checked.is_ok())?;
    checked?;
    if !ok {
        return Err(AmrError::InvalidOption(
            "estimator input rejected on a peer rank".into(),
        ));
    }

    let plan = NodeDistribute::new(comm, mesh.ownership(), tags.plan)?;
    let solution = synchronized(comm, mesh, &plan, tags.solution, solution)?;
    let adjoint = match (kind, adjoint) {
        (EstimatorKind::Adjoint, Some(adj)) => {
            Some(synchronized(comm, mesh, &plan, tags.adjoint, adj)?)
        }
        _ => None,
    };

    log::debug!("[rank {rank}] computing nodal weights");
    let weights = weights::compute_node_weights(comm, mesh, &plan, tags.weights)?;
    weights::check_orphans(comm, mesh, &weights, tags.orphans)?;

    log::debug!("[rank {rank}] recovering nodal derivatives");
    let derivs = recovery::recover_derivatives(comm, mesh, &plan, &weights, &solution, tags.derivs)?;
    let adjoint_derivs = adjoint
        .as_ref()
        .map(|adj| {
            recovery::recover_derivatives(comm, mesh, &plan, &weights, adj, tags.adjoint_derivs)
        })
        .transpose()?;

    let primal = Field {
        values: &solution,
        derivs: &derivs,
    };
    let indicator = match (&adjoint, &adjoint_derivs) {
        (Some(values), Some(derivs)) => Indicator::Adjoint {
            adjoint: Field { values, derivs },
            aux,
        },
        _ => Indicator::StrainEnergy,
    };
    log::debug!("[rank {rank}] evaluating {kind:?} indicator");
    let evaluated = local_errors(mesh, element, primal, indicator, options.time, options.rcond);
    if let Err(err) = &evaluated {
        log::error!("[rank {rank}] indicator evaluation failed: {err}");
    }
    let ok = all_agree(comm, tags.indicator, evaluated.is_ok())?;
    let local = evaluated?;
    if !ok {
        return Err(AmrError::InvalidMesh(
            "indicator evaluation failed on a peer rank".into(),
        ));
    }
    if !local.unreliable.is_empty() {
        log::warn!(
            "[rank {rank}] {} elements with a degenerate reconstruction (global ids {})",
            local.unreliable.len(),
            local.unreliable.iter().map(|&e| mesh.element_ids()[e]).join(", ")
        );
    }

    let local_total: f64 = local.errors.iter().sum();
    let total_error = allreduce_sum_f64(comm, tags.error_total, local_total)?;
    let total_elements = allreduce_sum_usize(comm, tags.element_count, mesh.num_elements())?;
    let (threshold, flags) = mark_elements(&local.errors, total_error, total_elements);
    let local_flagged = flags.iter().filter(|&&f| f).count();
    let elements_flagged = allreduce_sum_usize(comm, tags.flagged, local_flagged)?;
    if rank == options.root {
        log::info!(
            "estimated error {total_error:.6e} over {total_elements} elements, \
             threshold {threshold:.6e}, {elements_flagged} flagged"
        );
    }

    log::debug!("[rank {rank}] gathering refinement flags");
    let on_root = match (rank == options.root, partition, forest) {
        (true, Some(partition), Some(target)) => Some(RootRefinement { partition, target }),
        _ => None,
    };
    let cells_refined = refinement::refine_from_flags(
        comm,
        tags.refine,
        options.root,
        mesh.element_ids(),
        &flags,
        on_root,
        options.min_level,
        options.max_level,
    )?;
    if let Some(cells) = cells_refined {
        log::info!("refined {cells} cells");
    }

    Ok(EstimateReport {
        total_error,
        total_elements,
        threshold,
        elements_flagged,
        cells_refined,
        unreliable_elements: local.unreliable.len(),
        element_errors: local.errors,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        let opts = AdaptOptions::default();
        assert_eq!(opts.min_level, 2);
        assert_eq!(opts.max_level, MAX_LEVEL);
        opts.validate().unwrap();
    }

    #[test]
    fn level_bounds_are_checked() {
        let opts = AdaptOptions {
            min_level: 5,
            max_level: 4,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(AmrError::InvalidLevels { min: 5, max: 4, .. })
        ));
        let opts = AdaptOptions {
            max_level: MAX_LEVEL + 1,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
        let opts = AdaptOptions {
            rcond: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(AmrError::InvalidOption(_))));
    }

    #[test]
    fn phase_tags_do_not_overlap() {
        let tags = AdaptCommTags::from_base(0x100);
        let starts = [
            (tags.inputs, 4),
            (tags.plan, PLAN_TAGS),
            (tags.solution, TRANSFER_TAGS),
            (tags.adjoint, TRANSFER_TAGS),
            (tags.weights, 2 * TRANSFER_TAGS),
            (tags.orphans, 4),
            (tags.derivs, 2 * TRANSFER_TAGS),
            (tags.adjoint_derivs, 2 * TRANSFER_TAGS),
            (tags.indicator, 4),
            (tags.error_total, 4),
            (tags.element_count, 4),
            (tags.flagged, 4),
            (tags.refine, REFINE_TAGS),
        ];
        let mut expected = 0x100;
        for (tag, width) in starts {
            assert_eq!(tag.as_u16(), expected);
            expected += width;
        }
        assert_eq!(expected - 0x100, AdaptCommTags::SPAN);
        // the next cycle starts right after the refine block
        let next = AdaptCommTags::from_base(0x100 + AdaptCommTags::SPAN);
        assert_eq!(next.inputs.as_u16(), tags.refine.as_u16() + REFINE_TAGS);
    }
}
