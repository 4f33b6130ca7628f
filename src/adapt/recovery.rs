//! Nodal derivative recovery by weighted averaging of element derivatives.
//!
//! Every element evaluates the physical gradient of its quadratic
//! interpolant at its nine nodes. Each contribution is divided by the node's
//! weight, so after accumulation every node holds the average over the
//! elements that reference it. The result has `3 * vars_per_node` values per
//! node, ordered `[k][x, y, z]`.

use crate::algs::communicator::{CommTag, Communicator};
use crate::data::local_mesh::LocalMesh;
use crate::data::node_distribute::{NodeDistribute, TRANSFER_TAGS};
use crate::data::node_vector::NodeVector;
use crate::discretization::quad9::{NUM_NODES, SurfaceFrame, node_location, shape_functions};
use crate::mesh_error::AmrError;

/// Weighted derivative contributions of one element, node-major.
///
/// Nodes where the surface frame is singular contribute nothing; the number
/// of such nodes is returned alongside.
pub fn element_derivatives(
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
    node_weights: &[f64],
    vars_per_node: usize,
) -> (Vec<f64>, usize) {
    let stride = 3 * vars_per_node;
    let mut out = vec![0.0; NUM_NODES * stride];
    let mut skipped = 0;
    for (node, block) in out.chunks_exact_mut(stride).enumerate() {
        let [xi, eta] = node_location(node);
        let tab = shape_functions(xi, eta);
        let Some(frame) = SurfaceFrame::new(xpts, &tab) else {
            skipped += 1;
            continue;
        };
        let w = node_weights[node];
        let winv = if w > 0.0 { 1.0 / w } else { 0.0 };
        let ua = tab.interpolate_a(vars, vars_per_node);
        let ub = tab.interpolate_b(vars, vars_per_node);
        for k in 0..vars_per_node {
            let g = frame.push_forward(ua[k], ub[k]);
            for d in 0..3 {
                block[3 * k + d] = winv * g[d];
            }
        }
    }
    (out, skipped)
}

/// Recover averaged nodal derivatives of `solution`. Collective; uses
/// `2 * TRANSFER_TAGS` tags.
///
/// `solution` must hold valid ghost and dependent values.
pub fn recover_derivatives<C: Communicator>(
    comm: &C,
    mesh: &LocalMesh,
    plan: &NodeDistribute,
    weights: &NodeVector,
    solution: &NodeVector,
    tag: CommTag,
) -> Result<NodeVector, AmrError> {
    let vpn = mesh.vars_per_node();
    if solution.stride() != vpn {
        return Err(AmrError::VarsPerNodeMismatch {
            mesh: vpn,
            element: solution.stride(),
        });
    }
    let mut derivs = mesh.new_node_vector(3 * vpn);
    let mut skipped = 0;
    for element in 0..mesh.num_elements() {
        let nodes = mesh.element_nodes(element);
        let xpts = mesh.element_coords(element);
        let vars = solution.element_values(nodes);
        let w = weights.element_values(nodes);
        let (contrib, bad) = element_derivatives(&xpts, &vars, &w, vpn);
        if bad > 0 {
            log::warn!(
                "[rank {}] element {} has {bad} nodes with a singular frame",
                comm.rank(),
                mesh.element_ids()[element]
            );
        }
        skipped += bad;
        derivs.add_element_values(nodes, &contrib);
    }
    log::debug!(
        "[rank {}] derivative recovery: {} elements, {skipped} nodes skipped",
        comm.rank(),
        mesh.num_elements()
    );

    mesh.constraints().add_dependent_residual(&mut derivs)?;
    plan.reverse_add(comm, tag, &mut derivs)?;
    plan.forward(comm, tag.offset(TRANSFER_TAGS), &mut derivs)?;
    mesh.constraints().set_dependent_values(&mut derivs)?;
    Ok(derivs)
}
