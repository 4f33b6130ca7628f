//! Element error indicators built from the enrichment reconstruction.
//!
//! Both indicators split an element into a 2x2 grid of nine-node
//! sub-elements. Sub-element node positions and the quadratic part of the
//! field are interpolated with the parent's shape functions; the enriched
//! field adds `Σ ubar_i N_i^e`. Residuals are evaluated in steady state.

use crate::adapt::reconstruction::{Reconstruction, reconstruct_element};
use crate::data::local_mesh::LocalMesh;
use crate::data::node_vector::NodeVector;
use crate::discretization::quad9::{NUM_NODES, enrichment, shape_functions};
use crate::mesh_error::AmrError;
use crate::physics::fe::ElementResidual;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Nodal values of a field and its recovered derivatives, both with valid
/// ghost and dependent entries.
#[derive(Clone, Copy, Debug)]
pub struct Field<'a> {
    pub values: &'a NodeVector,
    pub derivs: &'a NodeVector,
}

/// Which indicator to evaluate.
#[derive(Clone, Copy)]
pub enum Indicator<'a> {
    /// `|SE(refined) - SE(original)|` with `SE = r(u)·u`.
    StrainEnergy,
    /// `Σ_dof |(r(u_c) - r(u_q)) (λ_c - λ_q)|` over the four sub-elements.
    Adjoint {
        adjoint: Field<'a>,
        /// Extra element residual (e.g. a load) added to the enriched residual.
        aux: Option<&'a dyn ElementResidual>,
    },
}

/// A sub-element of the 2x2 split.
#[derive(Clone, Debug, PartialEq)]
pub struct SubElement {
    pub xpts: [[f64; 3]; NUM_NODES],
    pub vars: Vec<f64>,
}

/// Parent coordinates of node `(n, m)` of sub-element `(ii, jj)`.
fn sub_node_location(ii: usize, jj: usize, n: usize, m: usize) -> [f64; 2] {
    [
        -1.0 + 0.5 * (2 * ii + n) as f64,
        -1.0 + 0.5 * (2 * jj + m) as f64,
    ]
}

/// The four sub-elements of the quadratic interpolant, ordered `(ii, jj)`
/// with `ii` fastest.
pub fn quadratic_sub_elements(
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
    vars_per_node: usize,
) -> Vec<SubElement> {
    let coords: Vec<f64> = xpts.iter().flatten().copied().collect();
    let mut subs = Vec::with_capacity(4);
    for jj in 0..2 {
        for ii in 0..2 {
            let mut sub = SubElement {
                xpts: [[0.0; 3]; NUM_NODES],
                vars: Vec::with_capacity(NUM_NODES * vars_per_node),
            };
            for node in 0..NUM_NODES {
                let [xi, eta] = sub_node_location(ii, jj, node % 3, node / 3);
                let tab = shape_functions(xi, eta);
                let x = tab.interpolate(&coords, 3);
                sub.xpts[node] = [x[0], x[1], x[2]];
                sub.vars.extend(tab.interpolate(vars, vars_per_node));
            }
            subs.push(sub);
        }
    }
    subs
}

/// Add the enrichment `Σ ubar_i N_i^e` to quadratic sub-elements in place.
pub fn add_enrichment(subs: &mut [SubElement], recon: &Reconstruction, vars_per_node: usize) {
    for (s, sub) in subs.iter_mut().enumerate() {
        let (ii, jj) = (s % 2, s / 2);
        for node in 0..NUM_NODES {
            let [xi, eta] = sub_node_location(ii, jj, node % 3, node / 3);
            let e = enrichment(xi, eta);
            let block = &mut sub.vars[vars_per_node * node..vars_per_node * (node + 1)];
            for (i, ni) in e.n.iter().enumerate() {
                for (k, v) in block.iter_mut().enumerate() {
                    *v += recon.coefficients[vars_per_node * i + k] * ni;
                }
            }
        }
    }
}

/// `r(u)·u` in steady state.
pub fn strain_energy<E: ElementResidual + ?Sized>(
    element: &E,
    time: f64,
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
) -> Result<f64, AmrError> {
    let res = element.residual(time, xpts, vars)?;
    Ok(res.iter().zip(vars).map(|(r, u)| r * u).sum())
}

/// Energy indicator of one element.
pub fn energy_error<E: ElementResidual + ?Sized>(
    element: &E,
    time: f64,
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
    recon: &Reconstruction,
) -> Result<f64, AmrError> {
    let vpn = element.vars_per_node();
    let se = strain_energy(element, time, xpts, vars)?;
    let mut subs = quadratic_sub_elements(xpts, vars, vpn);
    add_enrichment(&mut subs, recon, vpn);
    let mut se_refine = 0.0;
    for sub in &subs {
        se_refine += strain_energy(element, time, &sub.xpts, &sub.vars)?;
    }
    Ok((se_refine - se).abs())
}

fn refined_residual<E: ElementResidual + ?Sized>(
    element: &E,
    aux: Option<&dyn ElementResidual>,
    time: f64,
    sub: &SubElement,
) -> Result<Vec<f64>, AmrError> {
    let mut res = element.residual(time, &sub.xpts, &sub.vars)?;
    if let Some(aux) = aux {
        let zeros = vec![0.0; res.len()];
        aux.add_residual(time, &mut res, &sub.xpts, &sub.vars, &zeros, &zeros)?;
    }
    Ok(res)
}

/// Adjoint-weighted indicator of one element.
#[allow(clippy::too_many_arguments)]
pub fn adjoint_error<E: ElementResidual + ?Sized>(
    element: &E,
    aux: Option<&dyn ElementResidual>,
    time: f64,
    xpts: &[[f64; 3]; NUM_NODES],
    vars: &[f64],
    adjoint: &[f64],
    recon: &Reconstruction,
    adjoint_recon: &Reconstruction,
) -> Result<f64, AmrError> {
    let vpn = element.vars_per_node();
    let quad = quadratic_sub_elements(xpts, vars, vpn);
    let mut cubic = quad.clone();
    add_enrichment(&mut cubic, recon, vpn);
    let quad_adj = quadratic_sub_elements(xpts, adjoint, vpn);
    let mut cubic_adj = quad_adj.clone();
    add_enrichment(&mut cubic_adj, adjoint_recon, vpn);

    let mut error = 0.0;
    for s in 0..quad.len() {
        let resq = refined_residual(element, None, time, &quad[s])?;
        let resc = refined_residual(element, aux, time, &cubic[s])?;
        for j in 0..resq.len() {
            let dadj = cubic_adj[s].vars[j] - quad_adj[s].vars[j];
            error += ((resc[j] - resq[j]) * dadj).abs();
        }
    }
    Ok(error)
}

/// Per-element errors of this rank.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalErrors {
    pub errors: Vec<f64>,
    /// Local indices of elements whose reconstruction or geometry was
    /// degenerate. Their error is 0.
    pub unreliable: Vec<usize>,
}

/// Evaluate `indicator` on every local element.
///
/// An element with an unreliable reconstruction, or whose residual reports
/// [`AmrError::DegenerateGeometry`], gets error 0 and is listed in
/// [`LocalErrors::unreliable`].
pub fn local_errors<E: ElementResidual + ?Sized>(
    mesh: &LocalMesh,
    element: &E,
    primal: Field<'_>,
    indicator: Indicator<'_>,
    time: f64,
    rcond: f64,
) -> Result<LocalErrors, AmrError> {
    let vpn = mesh.vars_per_node();
    if element.vars_per_node() != vpn {
        return Err(AmrError::VarsPerNodeMismatch {
            mesh: vpn,
            element: element.vars_per_node(),
        });
    }
    if let Indicator::Adjoint { aux: Some(aux), .. } = indicator {
        if aux.vars_per_node() != vpn {
            return Err(AmrError::VarsPerNodeMismatch {
                mesh: vpn,
                element: aux.vars_per_node(),
            });
        }
    }

    const SKIPPED: (f64, bool) = (0.0, false);
    let absorb = |result: Result<f64, AmrError>| match result {
        Ok(err) => Ok((err, true)),
        Err(AmrError::DegenerateGeometry(_)) => Ok(SKIPPED),
        Err(err) => Err(err),
    };
    let one = |e: usize| -> Result<(f64, bool), AmrError> {
        let nodes = mesh.element_nodes(e);
        let xpts = mesh.element_coords(e);
        let vars = primal.values.element_values(nodes);
        let derivs = primal.derivs.element_values(nodes);
        let recon = reconstruct_element(&xpts, &vars, &derivs, vpn, rcond);
        if !recon.reliable {
            return Ok(SKIPPED);
        }
        match indicator {
            Indicator::StrainEnergy => absorb(energy_error(element, time, &xpts, &vars, &recon)),
            Indicator::Adjoint { adjoint, aux } => {
                let adj = adjoint.values.element_values(nodes);
                let adj_derivs = adjoint.derivs.element_values(nodes);
                let adj_recon = reconstruct_element(&xpts, &adj, &adj_derivs, vpn, rcond);
                if !adj_recon.reliable {
                    return Ok(SKIPPED);
                }
                absorb(adjoint_error(
                    element, aux, time, &xpts, &vars, &adj, &recon, &adj_recon,
                ))
            }
        }
    };

    #[cfg(feature = "rayon")]
    let per_element: Vec<(f64, bool)> = (0..mesh.num_elements())
        .into_par_iter()
        .map(one)
        .collect::<Result<_, _>>()?;
    #[cfg(not(feature = "rayon"))]
    let per_element: Vec<(f64, bool)> = (0..mesh.num_elements())
        .map(one)
        .collect::<Result<_, _>>()?;

    let mut out = LocalErrors {
        errors: Vec::with_capacity(per_element.len()),
        unreliable: Vec::new(),
    };
    for (e, (err, reliable)) in per_element.into_iter().enumerate() {
        out.errors.push(err);
        if !reliable {
            out.unreliable.push(e);
        }
    }
    Ok(out)
}

/// Flag every element whose error is at or above the mean `total / count`.
///
/// Returns the threshold and the flags. With `count == 0` the threshold is 0.
pub fn mark_elements(errors: &[f64], total: f64, count: usize) -> (f64, Vec<bool>) {
    let threshold = if count == 0 { 0.0 } else { total / count as f64 };
    (threshold, errors.iter().map(|&e| e >= threshold).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::refinement::ElementPartition;
    use crate::algs::distribute::distribute_mesh;
    use crate::discretization::quad9::{ENRICHMENT_SIZE, node_location};
    use crate::mesh_generation::structured_quad9;
    use crate::physics::fe::{BodyLoadQuad9, LaplaceQuad9};

    fn square() -> [[f64; 3]; NUM_NODES] {
        std::array::from_fn(|k| {
            let [xi, eta] = node_location(k);
            [xi, eta, 0.0]
        })
    }

    fn recon(coefficients: Vec<f64>) -> Reconstruction {
        Reconstruction {
            coefficients,
            reliable: true,
        }
    }

    #[test]
    fn sub_elements_tile_the_parent() {
        let subs = quadratic_sub_elements(&square(), &[0.0; NUM_NODES], 1);
        assert_eq!(subs.len(), 4);
        assert_eq!(subs[0].xpts[0], [-1.0, -1.0, 0.0]);
        assert_eq!(subs[0].xpts[8], [0.0, 0.0, 0.0]);
        assert_eq!(subs[1].xpts[2], [1.0, -1.0, 0.0]);
        assert_eq!(subs[3].xpts[8], [1.0, 1.0, 0.0]);
        assert_eq!(subs[2].xpts[4], [-0.5, 0.5, 0.0]);
    }

    #[test]
    fn quadratic_field_has_zero_energy_error() {
        let xpts = square();
        let vars: Vec<f64> = xpts.iter().map(|x| x[0] * x[0] + x[0] * x[1]).collect();
        let model = LaplaceQuad9::new(1, 1.0);
        let err = energy_error(&model, 0.0, &xpts, &vars, &recon(vec![0.0; 7])).unwrap();
        assert!(err.abs() < 1e-12);
    }

    #[test]
    fn enrichment_changes_the_energy() {
        let xpts = square();
        let model = LaplaceQuad9::new(1, 1.0);
        let mut c = vec![0.0; ENRICHMENT_SIZE];
        c[0] = 1.0;
        // refined halves interpolate ca(x) = x - x³ by ±1.5 x (1 ∓ x), energy 4 * 0.75
        let err = energy_error(&model, 0.0, &xpts, &[0.0; NUM_NODES], &recon(c)).unwrap();
        assert!((err - 3.0).abs() < 1e-10);
    }

    #[test]
    fn adjoint_error_vanishes_without_adjoint_enrichment() {
        let xpts = square();
        let model = LaplaceQuad9::new(1, 1.0);
        let load = BodyLoadQuad9 { load: vec![2.0] };
        let mut c = vec![0.0; ENRICHMENT_SIZE];
        c[3] = 0.5;
        let err = adjoint_error(
            &model,
            Some(&load),
            0.0,
            &xpts,
            &[0.0; NUM_NODES],
            &[1.0; NUM_NODES],
            &recon(c.clone()),
            &recon(vec![0.0; ENRICHMENT_SIZE]),
        )
        .unwrap();
        assert_eq!(err, 0.0);

        let err = adjoint_error(
            &model,
            Some(&load),
            0.0,
            &xpts,
            &[0.0; NUM_NODES],
            &[1.0; NUM_NODES],
            &recon(c.clone()),
            &recon(c),
        )
        .unwrap();
        assert!(err > 0.0);
    }

    #[test]
    fn load_enters_the_enriched_residual_only() {
        let xpts = square();
        let model = LaplaceQuad9::new(1, 1.0);
        let load = BodyLoadQuad9 { load: vec![1000.0] };
        let mut c = vec![0.0; ENRICHMENT_SIZE];
        c[0] = 1.0;
        c[3] = 0.5;
        let eval = |aux: Option<&dyn ElementResidual>| {
            adjoint_error(
                &model,
                aux,
                0.0,
                &xpts,
                &[0.0; NUM_NODES],
                &[1.0; NUM_NODES],
                &recon(c.clone()),
                &recon(c.clone()),
            )
            .unwrap()
        };
        let without = eval(None);
        let with = eval(Some(&load));
        assert!(without > 0.0);
        assert!(with > without + 1.0, "load ignored: {with} vs {without}");
    }

    #[test]
    fn collapsed_element_is_skipped() {
        let mut global = structured_quad9(1, 1, [0.0, 1.0], [0.0, 1.0]).unwrap();
        // all nodes on one vertical line
        global.coords.iter_mut().for_each(|x| x[0] = 1.0);
        let mesh = distribute_mesh(&global, &ElementPartition::blocked(1, 1), 0, 1).unwrap();
        let values = mesh.node_vector_from_fn(|x, out| out[0] = x[1] * x[1]).unwrap();
        let derivs = mesh.new_node_vector(3);
        let primal = Field {
            values: &values,
            derivs: &derivs,
        };
        let model = LaplaceQuad9::new(1, 1.0);
        for indicator in [
            Indicator::StrainEnergy,
            Indicator::Adjoint {
                adjoint: primal,
                aux: None,
            },
        ] {
            let out = local_errors(&mesh, &model, primal, indicator, 0.0, 1e-10).unwrap();
            assert_eq!(out.errors, vec![0.0]);
            assert_eq!(out.unreliable, vec![0]);
        }
    }

    #[test]
    fn marking_uses_the_mean_with_ties_flagged() {
        let (t, flags) = mark_elements(&[1.0, 3.0, 2.0], 6.0, 3);
        assert_eq!(t, 2.0);
        assert_eq!(flags, vec![false, true, true]);
        let (t, flags) = mark_elements(&[0.0, 0.0], 0.0, 2);
        assert_eq!(t, 0.0);
        assert_eq!(flags, vec![true, true]);
        assert_eq!(mark_elements(&[], 0.0, 0), (0.0, Vec::new()));
    }
}
