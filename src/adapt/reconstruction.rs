//! Per-element cubic enrichment fitted to recovered nodal derivatives.
//!
//! At each of the nine nodes two in-plane directions `d1`, `d2` are formed
//! from the surface frame. The difference between the recovered derivative
//! and the derivative of the native quadratic interpolant, projected onto
//! both directions, is matched in a weighted least-squares sense by the
//! derivatives of the seven enrichment functions. The 18x7 system has rank 6
//! at most (the bubble has a vanishing gradient at every node); the
//! minimum-norm solution is taken.

use crate::discretization::quad9::{
    ENRICHMENT_SIZE, NUM_NODES, SurfaceFrame, enrichment, node_location, shape_functions,
};
use nalgebra::{DMatrix, Vector3};

/// Per-direction row weight; node rows are scaled by `ROW_WEIGHTS[ii] * ROW_WEIGHTS[jj]`.
pub const ROW_WEIGHTS: [f64; 3] = [0.5, 1.0, 0.5];

/// Rank of a well-posed reconstruction system.
pub const FULL_RANK: usize = ENRICHMENT_SIZE - 1;

/// Enrichment coefficients of one element.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconstruction {
    /// `ENRICHMENT_SIZE * vars_per_node` values, entry `vars_per_node * i + k`
    /// is the coefficient of enrichment function `i` for variable `k`.
    pub coefficients: Vec<f64>,
    /// False when the system was degenerate and the coefficients were zeroed.
    pub reliable: bool,
}

impl Reconstruction {
    fn zero(vars_per_node: usize) -> Self {
        Self {
            coefficients: vec![0.0; ENRICHMENT_SIZE * vars_per_node],
            reliable: false,
        }
    }

    /// Coefficient of enrichment function `i` for variable `k`.
    pub fn coefficient(&self, i: usize, k: usize) -> f64 {
        let vpn = self.coefficients.len() / ENRICHMENT_SIZE;
        self.coefficients[vpn * i + k]
    }
}

fn dot(a: &Vector3<f64>, g: [f64; 3]) -> f64 {
    a.x * g[0] + a.y * g[1] + a.z * g[2]
}

/// Assemble the weighted system `A c = B` (18 rows, one column of `B` per variable).
///
/// `None` if the frame is singular at any node.
pub fn assemble_system(
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
    derivs: &[f64],
    vars_per_node: usize,
) -> Option<(DMatrix<f64>, DMatrix<f64>)> {
    let vpn = vars_per_node;
    let mut a = DMatrix::zeros(2 * NUM_NODES, ENRICHMENT_SIZE);
    let mut b = DMatrix::zeros(2 * NUM_NODES, vpn);
    for node in 0..NUM_NODES {
        let [xi, eta] = node_location(node);
        let tab = shape_functions(xi, eta);
        let frame = SurfaceFrame::new(xpts, &tab)?;
        let (d1, d2) = frame.tangent_directions();
        let wt = ROW_WEIGHTS[node % 3] * ROW_WEIGHTS[node / 3];
        let row = 2 * node;

        let e = enrichment(xi, eta);
        for m in 0..ENRICHMENT_SIZE {
            let g = frame.push_forward(e.na[m], e.nb[m]);
            a[(row, m)] = wt * dot(&d1, g);
            a[(row + 1, m)] = wt * dot(&d2, g);
        }

        let ua = tab.interpolate_a(vars, vpn);
        let ub = tab.interpolate_b(vars, vpn);
        let prescribed = &derivs[3 * vpn * node..3 * vpn * (node + 1)];
        for k in 0..vpn {
            let native = frame.push_forward(ua[k], ub[k]);
            let diff = [
                prescribed[3 * k] - native[0],
                prescribed[3 * k + 1] - native[1],
                prescribed[3 * k + 2] - native[2],
            ];
            b[(row, k)] = wt * dot(&d1, diff);
            b[(row + 1, k)] = wt * dot(&d2, diff);
        }
    }
    Some((a, b))
}

/// Fit the enrichment coefficients of one element.
///
/// `vars` holds the nine nodal values (node-major), `derivs` the recovered
/// derivatives (`3 * vars_per_node` per node, `[k][x, y, z]`). Singular
/// values below `rcond * σ_max` are treated as zero. A singular frame, a rank
/// below [`FULL_RANK`] or a non-finite solution yields zero coefficients and
/// `reliable == false`.
pub fn reconstruct_element(
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
    derivs: &[f64],
    vars_per_node: usize,
    rcond: f64,
) -> Reconstruction {
    let Some((a, b)) = assemble_system(xpts, vars, derivs, vars_per_node) else {
        return Reconstruction::zero(vars_per_node);
    };
    let svd = a.svd(true, true);
    let sigma_max = svd.singular_values.max();
    if !(sigma_max > 0.0) || !sigma_max.is_finite() {
        return Reconstruction::zero(vars_per_node);
    }
    let eps = rcond * sigma_max;
    if svd.rank(eps) < FULL_RANK {
        return Reconstruction::zero(vars_per_node);
    }
    let Ok(x) = svd.solve(&b, eps) else {
        return Reconstruction::zero(vars_per_node);
    };
    if x.iter().any(|v| !v.is_finite()) {
        return Reconstruction::zero(vars_per_node);
    }
    let mut coefficients = vec![0.0; ENRICHMENT_SIZE * vars_per_node];
    for i in 0..ENRICHMENT_SIZE {
        for k in 0..vars_per_node {
            coefficients[vars_per_node * i + k] = x[(i, k)];
        }
    }
    Reconstruction {
        coefficients,
        reliable: true,
    }
}
