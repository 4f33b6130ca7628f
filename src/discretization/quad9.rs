//! Nine-node biquadratic quadrilateral: shape functions, enrichment space,
//! surface frames and quadrature.
//!
//! Node `ii + 3*jj` of the element sits at the reference point
//! `(-1 + ii, -1 + jj)`, so nodes are ordered row by row in η.

use nalgebra::{Matrix3, Vector3};

/// Nodes per element.
pub const NUM_NODES: usize = 9;
/// Functions in the enrichment space.
pub const ENRICHMENT_SIZE: usize = 7;

/// One-dimensional quadratic Lagrange values and derivatives at nodes -1, 0, 1.
fn lagrange3(x: f64) -> ([f64; 3], [f64; 3]) {
    (
        [0.5 * x * (x - 1.0), 1.0 - x * x, 0.5 * x * (x + 1.0)],
        [x - 0.5, -2.0 * x, x + 0.5],
    )
}

/// Reference coordinates of element node `node`.
pub fn node_location(node: usize) -> [f64; 2] {
    [-1.0 + (node % 3) as f64, -1.0 + (node / 3) as f64]
}

/// Shape function values and reference derivatives at one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeTabulation<const N: usize> {
    pub n: [f64; N],
    pub na: [f64; N],
    pub nb: [f64; N],
}

pub type Quad9Tabulation = ShapeTabulation<NUM_NODES>;
pub type EnrichmentTabulation = ShapeTabulation<ENRICHMENT_SIZE>;

/// Tensor-product biquadratic shape functions at `(xi, eta)`.
pub fn shape_functions(xi: f64, eta: f64) -> Quad9Tabulation {
    let (na, da) = lagrange3(xi);
    let (nb, db) = lagrange3(eta);
    let mut tab = Quad9Tabulation {
        n: [0.0; NUM_NODES],
        na: [0.0; NUM_NODES],
        nb: [0.0; NUM_NODES],
    };
    for jj in 0..3 {
        for ii in 0..3 {
            let k = ii + 3 * jj;
            tab.n[k] = na[ii] * nb[jj];
            tab.na[k] = da[ii] * nb[jj];
            tab.nb[k] = na[ii] * db[jj];
        }
    }
    tab
}

/// The cubic enrichment space and its reference derivatives at `(xi, eta)`.
///
/// Every function vanishes at the nine element nodes. The last one,
/// `ca(ξ)·cb(η)`, also has a vanishing gradient there.
pub fn enrichment(xi: f64, eta: f64) -> EnrichmentTabulation {
    let ca = (1.0 + xi) * xi * (1.0 - xi);
    let cb = (1.0 + eta) * eta * (1.0 - eta);
    let da = 1.0 - 3.0 * xi * xi;
    let db = 1.0 - 3.0 * eta * eta;
    EnrichmentTabulation {
        n: [
            ca,
            eta * ca,
            eta * eta * ca,
            cb,
            xi * cb,
            xi * xi * cb,
            ca * cb,
        ],
        na: [da, eta * da, eta * eta * da, 0.0, cb, 2.0 * xi * cb, da * cb],
        nb: [0.0, ca, 2.0 * eta * ca, db, xi * db, xi * xi * db, ca * db],
    }
}

impl<const N: usize> ShapeTabulation<N> {
    /// Interpolate `stride` components from node-major `values` (`N * stride`).
    pub fn interpolate(&self, values: &[f64], stride: usize) -> Vec<f64> {
        self.combine(&self.n, values, stride)
    }

    /// ξ-derivative of the interpolant.
    pub fn interpolate_a(&self, values: &[f64], stride: usize) -> Vec<f64> {
        self.combine(&self.na, values, stride)
    }

    /// η-derivative of the interpolant.
    pub fn interpolate_b(&self, values: &[f64], stride: usize) -> Vec<f64> {
        self.combine(&self.nb, values, stride)
    }

    fn combine(&self, weights: &[f64; N], values: &[f64], stride: usize) -> Vec<f64> {
        let mut out = vec![0.0; stride];
        for (w, block) in weights.iter().zip(values.chunks_exact(stride)) {
            for (o, v) in out.iter_mut().zip(block) {
                *o += w * v;
            }
        }
        out
    }
}

/// Three-point Gauss-Legendre rule on `[-1, 1]`.
pub const GAUSS3_POINTS: [f64; 3] = [-0.774_596_669_241_483_4, 0.0, 0.774_596_669_241_483_4];
pub const GAUSS3_WEIGHTS: [f64; 3] = [5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0];

/// Tensor-product 3x3 rule on the reference square: `([ξ, η], weight)`.
pub fn gauss3x3() -> impl Iterator<Item = ([f64; 2], f64)> {
    (0..9).map(|q| {
        let (i, j) = (q % 3, q / 3);
        (
            [GAUSS3_POINTS[i], GAUSS3_POINTS[j]],
            GAUSS3_WEIGHTS[i] * GAUSS3_WEIGHTS[j],
        )
    })
}

/// Local surface frame at one point of a (possibly embedded) element.
///
/// Rows of the frame matrix are `Xa`, `Xb` and the unit normal; the stored
/// inverse maps reference derivatives to physical gradients.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceFrame {
    pub xa: Vector3<f64>,
    pub xb: Vector3<f64>,
    pub normal: Vector3<f64>,
    /// `|Xa × Xb|`, the area scaling of the reference map.
    pub area: f64,
    inverse: Matrix3<f64>,
}

impl SurfaceFrame {
    /// Frame at the point tabulated by `tab` for element nodes `coords`.
    ///
    /// `None` if the tangents are parallel or the frame is not invertible.
    pub fn new(coords: &[[f64; 3]; NUM_NODES], tab: &Quad9Tabulation) -> Option<Self> {
        let mut xa = Vector3::zeros();
        let mut xb = Vector3::zeros();
        for (k, x) in coords.iter().enumerate() {
            let x = Vector3::from(*x);
            xa += x * tab.na[k];
            xb += x * tab.nb[k];
        }
        Self::from_tangents(xa, xb)
    }

    pub fn from_tangents(xa: Vector3<f64>, xb: Vector3<f64>) -> Option<Self> {
        let cross = xa.cross(&xb);
        let area = cross.norm();
        if !(area > 0.0) || !area.is_finite() {
            return None;
        }
        let normal = cross / area;
        let frame = Matrix3::from_rows(&[xa.transpose(), xb.transpose(), normal.transpose()]);
        let inverse = frame.try_inverse()?;
        Some(Self {
            xa,
            xb,
            normal,
            area,
            inverse,
        })
    }

    /// Physical gradient of a field with reference derivatives `(ua, ub)`.
    pub fn push_forward(&self, ua: f64, ub: f64) -> [f64; 3] {
        let g = self.inverse * Vector3::new(ua, ub, 0.0);
        [g.x, g.y, g.z]
    }

    /// Orthonormal in-plane directions: `Xa` normalized and `n × d1`.
    pub fn tangent_directions(&self) -> (Vector3<f64>, Vector3<f64>) {
        let d1 = self.xa.normalize();
        let d2 = self.normal.cross(&d1);
        (d1, d2)
    }
}
