//! Global nine-node quadrilateral meshes and small structured generators.
//!
//! A [`GlobalMesh`] is the serial description handed to
//! [`distribute_mesh`](crate::algs::distribute::distribute_mesh): independent
//! node coordinates, element connectivity, and dependent (hanging) nodes given
//! as linear combinations of independent nodes. A connectivity entry
//! `c >= num_nodes()` names dependent node `c - num_nodes()`.

use crate::data::hanging_node_constraints::LinearConstraintTerm;
use crate::discretization::quad9::NUM_NODES;
use crate::mesh_error::AmrError;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct GlobalMesh {
    /// Independent node coordinates.
    pub coords: Vec<[f64; 3]>,
    /// Element connectivity, nine entries per element in quad9 node order.
    pub conn: Vec<[usize; NUM_NODES]>,
    /// Dependent nodes; terms reference independent node indices.
    pub dependent: Vec<Vec<LinearConstraintTerm>>,
}

fn invalid_mesh(message: impl Into<String>) -> AmrError {
    AmrError::InvalidMesh(message.into())
}

impl GlobalMesh {
    pub fn num_nodes(&self) -> usize {
        self.coords.len()
    }

    pub fn num_dependent(&self) -> usize {
        self.dependent.len()
    }

    pub fn num_elements(&self) -> usize {
        self.conn.len()
    }

    /// Check every connectivity and constraint index.
    pub fn validate(&self) -> Result<(), AmrError> {
        let limit = self.num_nodes() + self.num_dependent();
        for (element, nodes) in self.conn.iter().enumerate() {
            if let Some(&node) = nodes.iter().find(|&&n| n >= limit) {
                return Err(AmrError::NodeIndexOutOfBounds {
                    element,
                    node,
                    len: limit,
                });
            }
        }
        for (dependent, terms) in self.dependent.iter().enumerate() {
            if terms.is_empty() {
                return Err(invalid_mesh(format!("dependent node {dependent} has no parents")));
            }
            if let Some(t) = terms.iter().find(|t| t.node >= self.num_nodes()) {
                return Err(AmrError::ConstraintIndexOutOfBounds {
                    dependent,
                    node: t.node,
                    len: self.num_nodes(),
                });
            }
        }
        Ok(())
    }

    /// Position of a connectivity entry (independent or dependent).
    pub fn node_position(&self, node: usize) -> [f64; 3] {
        match node.checked_sub(self.num_nodes()) {
            None => self.coords[node],
            Some(d) => {
                let mut x = [0.0; 3];
                for t in &self.dependent[d] {
                    for (xi, pi) in x.iter_mut().zip(self.coords[t.node]) {
                        *xi += t.weight * pi;
                    }
                }
                x
            }
        }
    }
}

/// Bilinear point of a corner quad with corner ordering
/// `(1-u)(1-v), u(1-v), (1-u)v, uv`.
fn bilinear(corners: &[[f64; 3]; 4], u: f64, v: f64) -> [f64; 3] {
    let w = [(1.0 - u) * (1.0 - v), u * (1.0 - v), (1.0 - u) * v, u * v];
    std::array::from_fn(|d| (0..4).map(|c| w[c] * corners[c][d]).sum())
}

/// Assigns node ids by position so that coincident nodes are shared.
#[derive(Default)]
struct NodeTable {
    ids: HashMap<[i64; 3], usize>,
    coords: Vec<[f64; 3]>,
}

impl NodeTable {
    const RESOLUTION: f64 = 1e9;

    fn key(x: &[f64; 3]) -> [i64; 3] {
        x.map(|v| (v * Self::RESOLUTION).round() as i64)
    }

    fn insert(&mut self, x: [f64; 3]) -> usize {
        let next = self.coords.len();
        let id = *self.ids.entry(Self::key(&x)).or_insert(next);
        if id == next {
            self.coords.push(x);
        }
        id
    }

    fn find(&self, x: &[f64; 3]) -> Option<usize> {
        self.ids.get(&Self::key(x)).copied()
    }
}

/// Quadratic mesh from bilinear corner quads; edge and face nodes are placed
/// at parametric midpoints and shared between neighbors.
pub fn from_corner_quads(
    corners: &[[f64; 3]],
    quads: &[[usize; 4]],
) -> Result<GlobalMesh, AmrError> {
    let mut table = NodeTable::default();
    let mut conn = Vec::with_capacity(quads.len());
    for (q, quad) in quads.iter().enumerate() {
        let mut c = [[0.0; 3]; 4];
        for (slot, &idx) in c.iter_mut().zip(quad) {
            *slot = *corners
                .get(idx)
                .ok_or_else(|| invalid_mesh(format!("quad {q} references missing corner {idx}")))?;
        }
        let nodes = std::array::from_fn(|k| {
            let (ii, jj) = (k % 3, k / 3);
            table.insert(bilinear(&c, 0.5 * ii as f64, 0.5 * jj as f64))
        });
        conn.push(nodes);
    }
    Ok(GlobalMesh {
        coords: table.coords,
        conn,
        dependent: Vec::new(),
    })
}

/// `nx` by `ny` rectangle of nine-node quads, elements row-major from the
/// lower-left corner.
pub fn structured_quad9(
    nx: usize,
    ny: usize,
    x_range: [f64; 2],
    y_range: [f64; 2],
) -> Result<GlobalMesh, AmrError> {
    if nx == 0 || ny == 0 {
        return Err(invalid_mesh("nx and ny must be positive"));
    }
    let row = 2 * nx + 1;
    let mut coords = Vec::with_capacity(row * (2 * ny + 1));
    for j in 0..=2 * ny {
        let y = y_range[0] + (y_range[1] - y_range[0]) * j as f64 / (2 * ny) as f64;
        for i in 0..row {
            let x = x_range[0] + (x_range[1] - x_range[0]) * i as f64 / (2 * nx) as f64;
            coords.push([x, y, 0.0]);
        }
    }
    let mut conn = Vec::with_capacity(nx * ny);
    for ej in 0..ny {
        for ei in 0..nx {
            conn.push(std::array::from_fn(|k| {
                (2 * ei + k % 3) + row * (2 * ej + k / 3)
            }));
        }
    }
    Ok(GlobalMesh {
        coords,
        conn,
        dependent: Vec::new(),
    })
}

/// Corner points of [`canonical_five_face`].
pub const FIVE_FACE_POINTS: [[f64; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.3, 0.7, 0.0],
    [0.7, 0.3, 0.0],
    [0.3, 0.3, 0.0],
    [0.7, 0.7, 0.0],
    [0.0, 1.0, 0.0],
    [1.0, 1.0, 0.0],
];

/// Corner connectivity of [`canonical_five_face`].
pub const FIVE_FACE_CONN: [[usize; 4]; 5] = [
    [0, 1, 4, 3],
    [2, 4, 5, 3],
    [6, 0, 2, 4],
    [2, 5, 6, 7],
    [3, 1, 5, 7],
];

/// The unit square split into five unstructured quads around an inner square.
pub fn canonical_five_face() -> Result<GlobalMesh, AmrError> {
    from_corner_quads(&FIVE_FACE_POINTS, &FIVE_FACE_CONN)
}

/// One element on `[0,1]²` next to two half-size elements on `[1,1.5]×[0,1]`.
///
/// The two mid-edge nodes of the fine elements on `x = 1` hang on the coarse
/// element's edge and are dependent on its three edge nodes.
pub fn coarse_fine_pair() -> Result<GlobalMesh, AmrError> {
    let coarse = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
    let lower = [[1.0, 0.0, 0.0], [1.5, 0.0, 0.0], [1.0, 0.5, 0.0], [1.5, 0.5, 0.0]];
    let upper = [[1.0, 0.5, 0.0], [1.5, 0.5, 0.0], [1.0, 1.0, 0.0], [1.5, 1.0, 0.0]];

    let hanging = [[1.0, 0.25, 0.0], [1.0, 0.75, 0.0]];
    let mut table = NodeTable::default();
    let mut conn = Vec::with_capacity(3);
    let mut pending = Vec::with_capacity(3);
    for c in [coarse, lower, upper] {
        let points: [[f64; 3]; NUM_NODES] =
            std::array::from_fn(|k| bilinear(&c, 0.5 * (k % 3) as f64, 0.5 * (k / 3) as f64));
        pending.push(points);
    }
    for points in &pending {
        for p in points.iter().filter(|p| !hanging.contains(p)) {
            table.insert(*p);
        }
    }

    let edge = [[1.0, 0.0, 0.0], [1.0, 0.5, 0.0], [1.0, 1.0, 0.0]];
    let mut parents = [0usize; 3];
    for (slot, p) in parents.iter_mut().zip(&edge) {
        *slot = table
            .find(p)
            .ok_or_else(|| invalid_mesh("coarse edge node missing"))?;
    }
    let weights = [[0.375, 0.75, -0.125], [-0.125, 0.75, 0.375]];
    let dependent: Vec<Vec<LinearConstraintTerm>> = weights
        .iter()
        .map(|w| {
            parents
                .iter()
                .zip(w)
                .map(|(&node, &weight)| LinearConstraintTerm::new(node, weight))
                .collect()
        })
        .collect();

    let num_nodes = table.coords.len();
    for points in &pending {
        let mut nodes = [0usize; NUM_NODES];
        for (slot, p) in nodes.iter_mut().zip(points) {
            *slot = match hanging.iter().position(|h| h == p) {
                Some(d) => num_nodes + d,
                None => table
                    .find(p)
                    .ok_or_else(|| invalid_mesh("element node missing from table"))?,
            };
        }
        conn.push(nodes);
    }
    Ok(GlobalMesh {
        coords: table.coords,
        conn,
        dependent,
    })
}
