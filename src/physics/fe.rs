//! Element residual models evaluated on nine-node quadrilaterals.
//!
//! The error indicators only need one capability from an element: evaluate
//! its residual for arbitrary (possibly reconstructed) nodal coordinates and
//! values. [`ElementResidual`] is that seam.

use crate::discretization::quad9::{NUM_NODES, SurfaceFrame, gauss3x3, shape_functions};
use crate::mesh_error::AmrError;

/// Residual evaluation for one nine-node element.
pub trait ElementResidual: Send + Sync {
    /// Values stored per node.
    fn vars_per_node(&self) -> usize;

    /// Length of the element residual and variable arrays.
    fn num_variables(&self) -> usize {
        NUM_NODES * self.vars_per_node()
    }

    /// Add the element residual into `res`.
    ///
    /// `vars`, `dvars` and `ddvars` are node-major with `vars_per_node` entries
    /// per node; `xpts` holds the nine node positions.
    fn add_residual(
        &self,
        time: f64,
        res: &mut [f64],
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
        dvars: &[f64],
        ddvars: &[f64],
    ) -> Result<(), AmrError>;

    /// Steady-state residual: zero rates, fresh output buffer.
    fn residual(
        &self,
        time: f64,
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
    ) -> Result<Vec<f64>, AmrError> {
        let n = self.num_variables();
        if vars.len() != n {
            return Err(AmrError::SliceLengthMismatch {
                expected: n,
                found: vars.len(),
            });
        }
        let zeros = vec![0.0; n];
        let mut res = vec![0.0; n];
        self.add_residual(time, &mut res, xpts, vars, &zeros, &zeros)?;
        Ok(res)
    }
}

impl<T: ElementResidual + ?Sized> ElementResidual for &T {
    fn vars_per_node(&self) -> usize {
        (**self).vars_per_node()
    }

    fn add_residual(
        &self,
        time: f64,
        res: &mut [f64],
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
        dvars: &[f64],
        ddvars: &[f64],
    ) -> Result<(), AmrError> {
        (**self).add_residual(time, res, xpts, vars, dvars, ddvars)
    }
}

impl ElementResidual for Box<dyn ElementResidual> {
    fn vars_per_node(&self) -> usize {
        (**self).vars_per_node()
    }

    fn add_residual(
        &self,
        time: f64,
        res: &mut [f64],
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
        dvars: &[f64],
        ddvars: &[f64],
    ) -> Result<(), AmrError> {
        (**self).add_residual(time, res, xpts, vars, dvars, ddvars)
    }
}

/// Shape values, physical gradients and weight at one quadrature point.
struct QuadPoint {
    n: [f64; NUM_NODES],
    grad: [[f64; 3]; NUM_NODES],
    weight: f64,
}

fn quadrature_points(xpts: &[[f64; 3]; NUM_NODES]) -> Result<Vec<QuadPoint>, AmrError> {
    gauss3x3()
        .map(|([xi, eta], w)| {
            let tab = shape_functions(xi, eta);
            let frame = SurfaceFrame::new(xpts, &tab).ok_or_else(|| {
                AmrError::DegenerateGeometry(format!(
                    "singular element frame at quadrature point ({xi:.3}, {eta:.3})"
                ))
            })?;
            let grad = std::array::from_fn(|k| frame.push_forward(tab.na[k], tab.nb[k]));
            Ok(QuadPoint {
                n: tab.n,
                grad,
                weight: w * frame.area,
            })
        })
        .collect()
}

fn check_lengths(expected: usize, res: &[f64], vars: &[f64]) -> Result<(), AmrError> {
    for found in [res.len(), vars.len()] {
        if found != expected {
            return Err(AmrError::SliceLengthMismatch { expected, found });
        }
    }
    Ok(())
}

/// Component-wise steady diffusion, `r = K u`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LaplaceQuad9 {
    pub vars_per_node: usize,
    pub conductivity: f64,
}

impl LaplaceQuad9 {
    pub fn new(vars_per_node: usize, conductivity: f64) -> Self {
        Self {
            vars_per_node,
            conductivity,
        }
    }
}

impl ElementResidual for LaplaceQuad9 {
    fn vars_per_node(&self) -> usize {
        self.vars_per_node
    }

    fn add_residual(
        &self,
        _time: f64,
        res: &mut [f64],
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
        _dvars: &[f64],
        _ddvars: &[f64],
    ) -> Result<(), AmrError> {
        let vpn = self.vars_per_node;
        check_lengths(self.num_variables(), res, vars)?;
        for qp in quadrature_points(xpts)? {
            for c in 0..vpn {
                let mut gu = [0.0; 3];
                for k in 0..NUM_NODES {
                    for d in 0..3 {
                        gu[d] += qp.grad[k][d] * vars[vpn * k + c];
                    }
                }
                let scale = qp.weight * self.conductivity;
                for i in 0..NUM_NODES {
                    let dot: f64 = qp.grad[i].iter().zip(&gu).map(|(a, b)| a * b).sum();
                    res[vpn * i + c] += scale * dot;
                }
            }
        }
        Ok(())
    }
}

/// Linear plane-stress elasticity with displacements along x and y.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PlaneStressQuad9 {
    pub modulus: f64,
    pub poisson: f64,
    pub thickness: f64,
}

impl PlaneStressQuad9 {
    fn stress(&self, exx: f64, eyy: f64, gxy: f64) -> [f64; 3] {
        let c = self.modulus / (1.0 - self.poisson * self.poisson);
        [
            c * (exx + self.poisson * eyy),
            c * (self.poisson * exx + eyy),
            c * 0.5 * (1.0 - self.poisson) * gxy,
        ]
    }
}

impl ElementResidual for PlaneStressQuad9 {
    fn vars_per_node(&self) -> usize {
        2
    }

    fn add_residual(
        &self,
        _time: f64,
        res: &mut [f64],
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
        _dvars: &[f64],
        _ddvars: &[f64],
    ) -> Result<(), AmrError> {
        check_lengths(self.num_variables(), res, vars)?;
        for qp in quadrature_points(xpts)? {
            let (mut exx, mut eyy, mut gxy) = (0.0, 0.0, 0.0);
            for k in 0..NUM_NODES {
                let [nx, ny, _] = qp.grad[k];
                let (u, v) = (vars[2 * k], vars[2 * k + 1]);
                exx += nx * u;
                eyy += ny * v;
                gxy += ny * u + nx * v;
            }
            let [sxx, syy, sxy] = self.stress(exx, eyy, gxy);
            let scale = qp.weight * self.thickness;
            for i in 0..NUM_NODES {
                let [nx, ny, _] = qp.grad[i];
                res[2 * i] += scale * (nx * sxx + ny * sxy);
                res[2 * i + 1] += scale * (ny * syy + nx * sxy);
            }
        }
        Ok(())
    }
}

/// Constant body load per component: `r_i -= ∫ N_i f dA`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BodyLoadQuad9 {
    pub load: Vec<f64>,
}

impl ElementResidual for BodyLoadQuad9 {
    fn vars_per_node(&self) -> usize {
        self.load.len()
    }

    fn add_residual(
        &self,
        _time: f64,
        res: &mut [f64],
        xpts: &[[f64; 3]; NUM_NODES],
        vars: &[f64],
        _dvars: &[f64],
        _ddvars: &[f64],
    ) -> Result<(), AmrError> {
        let vpn = self.load.len();
        check_lengths(self.num_variables(), res, vars)?;
        for qp in quadrature_points(xpts)? {
            for i in 0..NUM_NODES {
                for (c, f) in self.load.iter().enumerate() {
                    res[vpn * i + c] -= qp.weight * qp.n[i] * f;
                }
            }
        }
        Ok(())
    }
}
