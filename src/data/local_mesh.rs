//! One rank's share of a distributed nine-node quadrilateral mesh.

use crate::data::hanging_node_constraints::DependentNodeConstraints;
use crate::data::node_vector::NodeVector;
use crate::discretization::quad9::NUM_NODES;
use crate::mesh_error::AmrError;
use crate::topology::ownership::NodeOwnership;

/// Local elements, node coordinates and the ownership/constraint metadata
/// needed to accumulate and distribute nodal quantities.
///
/// Local node indices run over independent nodes first (the entries of
/// [`NodeOwnership`]) followed by dependent nodes.
#[derive(Clone, Debug)]
pub struct LocalMesh {
    vars_per_node: usize,
    ownership: NodeOwnership,
    constraints: DependentNodeConstraints,
    conn: Vec<[usize; NUM_NODES]>,
    coords: Vec<[f64; 3]>,
    element_ids: Vec<u64>,
}

impl LocalMesh {
    pub fn new(
        vars_per_node: usize,
        ownership: NodeOwnership,
        constraints: DependentNodeConstraints,
        conn: Vec<[usize; NUM_NODES]>,
        coords: Vec<[f64; 3]>,
        element_ids: Vec<u64>,
    ) -> Result<Self, AmrError> {
        if vars_per_node == 0 {
            return Err(AmrError::InvalidMesh("vars_per_node must be positive".into()));
        }
        if constraints.num_independent() != ownership.len() {
            return Err(AmrError::InvalidMesh(format!(
                "constraints cover {} independent nodes, ownership has {}",
                constraints.num_independent(),
                ownership.len()
            )));
        }
        let num_nodes = ownership.len() + constraints.num_dependent();
        if coords.len() != num_nodes {
            return Err(AmrError::SliceLengthMismatch {
                expected: num_nodes,
                found: coords.len(),
            });
        }
        if element_ids.len() != conn.len() {
            return Err(AmrError::SliceLengthMismatch {
                expected: conn.len(),
                found: element_ids.len(),
            });
        }
        for (element, nodes) in conn.iter().enumerate() {
            if let Some(&node) = nodes.iter().find(|&&n| n >= num_nodes) {
                return Err(AmrError::NodeIndexOutOfBounds {
                    element,
                    node,
                    len: num_nodes,
                });
            }
        }
        Ok(Self {
            vars_per_node,
            ownership,
            constraints,
            conn,
            coords,
            element_ids,
        })
    }

    pub fn vars_per_node(&self) -> usize {
        self.vars_per_node
    }

    pub fn ownership(&self) -> &NodeOwnership {
        &self.ownership
    }

    pub fn constraints(&self) -> &DependentNodeConstraints {
        &self.constraints
    }

    pub fn num_elements(&self) -> usize {
        self.conn.len()
    }

    pub fn num_independent(&self) -> usize {
        self.ownership.len()
    }

    pub fn num_dependent(&self) -> usize {
        self.constraints.num_dependent()
    }

    pub fn num_nodes(&self) -> usize {
        self.num_independent() + self.num_dependent()
    }

    /// Global ids of the local elements, in local order.
    pub fn element_ids(&self) -> &[u64] {
        &self.element_ids
    }

    pub fn element_nodes(&self, element: usize) -> &[usize; NUM_NODES] {
        &self.conn[element]
    }

    pub fn element_coords(&self, element: usize) -> [[f64; 3]; NUM_NODES] {
        self.conn[element].map(|n| self.coords[n])
    }

    /// Zero vector over all local nodes with `stride` values per node.
    pub fn new_node_vector(&self, stride: usize) -> NodeVector {
        NodeVector::zeros(self.num_nodes(), stride)
    }

    /// Solution vector sampled from `f(position, block)` at independent nodes;
    /// dependent values follow from the constraints.
    pub fn node_vector_from_fn<F>(&self, f: F) -> Result<NodeVector, AmrError>
    where
        F: Fn(&[f64; 3], &mut [f64]),
    {
        let mut v = self.new_node_vector(self.vars_per_node);
        for node in 0..self.num_independent() {
            f(&self.coords[node], v.block_mut(node));
        }
        self.constraints.set_dependent_values(&mut v)?;
        Ok(v)
    }

    /// Solution vector from global independent values (`vars_per_node` per
    /// global node, indexed by global id).
    pub fn node_vector_from_global(&self, values: &[f64]) -> Result<NodeVector, AmrError> {
        let vpn = self.vars_per_node;
        let mut v = self.new_node_vector(vpn);
        for node in 0..self.num_independent() {
            let global = self.ownership.global_id(node).unwrap_or_default() as usize;
            let src = values
                .get(global * vpn..(global + 1) * vpn)
                .ok_or(AmrError::SliceLengthMismatch {
                    expected: (global + 1) * vpn,
                    found: values.len(),
                })?;
            v.block_mut(node).copy_from_slice(src);
        }
        self.constraints.set_dependent_values(&mut v)?;
        Ok(v)
    }
}
