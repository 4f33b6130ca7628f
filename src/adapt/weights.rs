//! Nodal weights: how many elements reference each node.

use crate::algs::collective::allreduce_sum_usize;
use crate::algs::communicator::{CommTag, Communicator};
use crate::data::local_mesh::LocalMesh;
use crate::data::node_distribute::{NodeDistribute, TRANSFER_TAGS};
use crate::data::node_vector::NodeVector;
use crate::discretization::quad9::NUM_NODES;
use crate::mesh_error::AmrError;
use itertools::Itertools;

/// Accumulate a unit weight per element node, sum it on the owners and
/// distribute the totals back. Collective; uses `2 * TRANSFER_TAGS` tags.
///
/// Dependent-node contributions are moved onto their parents before the
/// exchange and dependent weights are recomputed from the parents after it.
pub fn compute_node_weights<C: Communicator>(
    comm: &C,
    mesh: &LocalMesh,
    plan: &NodeDistribute,
    tag: CommTag,
) -> Result<NodeVector, AmrError> {
    let mut weights = mesh.new_node_vector(1);
    let ones = [1.0; NUM_NODES];
    for element in 0..mesh.num_elements() {
        weights.add_element_values(mesh.element_nodes(element), &ones);
    }
    mesh.constraints().add_dependent_residual(&mut weights)?;
    plan.reverse_add(comm, tag, &mut weights)?;
    plan.forward(comm, tag.offset(TRANSFER_TAGS), &mut weights)?;
    mesh.constraints().set_dependent_values(&mut weights)?;
    Ok(weights)
}

/// Fail on every rank if any rank owns an independent node with no weight.
///
/// Collective; uses 4 tags.
pub fn check_orphans<C: Communicator>(
    comm: &C,
    mesh: &LocalMesh,
    weights: &NodeVector,
    tag: CommTag,
) -> Result<(), AmrError> {
    let orphans: Vec<usize> = mesh
        .ownership()
        .owned()
        .filter(|&node| weights.block(node)[0] <= 0.0)
        .collect();
    if !orphans.is_empty() {
        log::error!(
            "[rank {}] {} orphaned nodes (global ids {})",
            comm.rank(),
            orphans.len(),
            orphans
                .iter()
                .filter_map(|&node| mesh.ownership().global_id(node))
                .join(", ")
        );
    }
    let count = allreduce_sum_usize(comm, tag, orphans.len())?;
    if count > 0 {
        return Err(AmrError::OrphanNodes { count });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::distribute::distribute_mesh;
    use crate::adapt::refinement::ElementPartition;
    use crate::mesh_generation::structured_quad9;

    const TAG: CommTag = CommTag::new(0x1000);

    #[test]
    fn shared_nodes_count_their_elements() {
        let global = structured_quad9(2, 2, [0.0, 1.0], [0.0, 1.0]).unwrap();
        let partition = ElementPartition::blocked(4, 1);
        let mesh = distribute_mesh(&global, &partition, 0, 1).unwrap();
        let plan = NodeDistribute::new(&NoComm, mesh.ownership(), TAG).unwrap();
        let w = compute_node_weights(&NoComm, &mesh, &plan, TAG).unwrap();
        let centre = global.conn[0][8];
        let local = mesh.ownership().owned_index()[&(centre as u64)];
        assert_eq!(w.block(local), &[4.0]);
        assert_eq!(w.as_slice().iter().sum::<f64>(), 36.0);
        check_orphans(&NoComm, &mesh, &w, TAG).unwrap();
    }

    #[test]
    fn unreferenced_node_is_an_orphan() {
        let mut global = structured_quad9(1, 1, [0.0, 1.0], [0.0, 1.0]).unwrap();
        global.coords.push([5.0, 5.0, 0.0]);
        let partition = ElementPartition::blocked(1, 1);
        let mesh = distribute_mesh(&global, &partition, 0, 1).unwrap();
        let plan = NodeDistribute::new(&NoComm, mesh.ownership(), TAG).unwrap();
        let w = compute_node_weights(&NoComm, &mesh, &plan, TAG).unwrap();
        assert!(matches!(
            check_orphans(&NoComm, &mesh, &w, TAG),
            Err(AmrError::OrphanNodes { count: 1 })
        ));
    }
}
