//! Strided nodal storage over independent and dependent local nodes.
//!
//! A [`NodeVector`] holds `stride` scalars per local node. Independent nodes
//! come first (`0..num_independent`), dependent nodes follow. Owned blocks are
//! authoritative; ghost and dependent blocks are refreshed by
//! [`NodeDistribute::forward`](crate::data::node_distribute::NodeDistribute::forward)
//! and [`DependentNodeConstraints::set_dependent_values`](crate::data::hanging_node_constraints::DependentNodeConstraints::set_dependent_values).

use crate::mesh_error::AmrError;

#[derive(Clone, Debug, PartialEq)]
pub struct NodeVector {
    stride: usize,
    values: Vec<f64>,
}

impl NodeVector {
    /// Zero-filled vector for `num_nodes` nodes.
    pub fn zeros(num_nodes: usize, stride: usize) -> Self {
        Self {
            stride,
            values: vec![0.0; num_nodes * stride],
        }
    }

    /// Wrap existing values; `values.len()` must be a multiple of `stride`.
    pub fn from_values(stride: usize, values: Vec<f64>) -> Result<Self, AmrError> {
        if stride == 0 || values.len() % stride != 0 {
            return Err(AmrError::SliceLengthMismatch {
                expected: values.len().next_multiple_of(stride.max(1)),
                found: values.len(),
            });
        }
        Ok(Self { stride, values })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn num_nodes(&self) -> usize {
        self.values.len() / self.stride
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn block(&self, node: usize) -> &[f64] {
        &self.values[node * self.stride..(node + 1) * self.stride]
    }

    pub fn block_mut(&mut self, node: usize) -> &mut [f64] {
        &mut self.values[node * self.stride..(node + 1) * self.stride]
    }

    /// Gather the blocks of `nodes` into one element-local array (node-major).
    pub fn element_values(&self, nodes: &[usize]) -> Vec<f64> {
        let mut out = Vec::with_capacity(nodes.len() * self.stride);
        for &node in nodes {
            out.extend_from_slice(self.block(node));
        }
        out
    }

    /// Add an element-local array (node-major) into the blocks of `nodes`.
    pub fn add_element_values(&mut self, nodes: &[usize], values: &[f64]) {
        debug_assert_eq!(values.len(), nodes.len() * self.stride);
        for (&node, chunk) in nodes.iter().zip(values.chunks_exact(self.stride)) {
            for (dst, src) in self.block_mut(node).iter_mut().zip(chunk) {
                *dst += src;
            }
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
    }
}
