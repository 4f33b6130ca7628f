//! Hanging node constraints: dependent nodes as linear combinations of independent nodes.

use crate::data::node_vector::NodeVector;
use crate::mesh_error::AmrError;

/// A linear term referencing a parent (independent) node with a weight.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinearConstraintTerm {
    /// Local index of the independent parent node.
    pub node: usize,
    /// Weight applied to the parent value.
    pub weight: f64,
}

impl LinearConstraintTerm {
    pub fn new(node: usize, weight: f64) -> Self {
        Self { node, weight }
    }
}

/// Constraints for every dependent node of a local mesh.
///
/// Dependent node `d` lives at local index `num_independent + d` in every
/// [`NodeVector`] of the mesh.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct DependentNodeConstraints {
    num_independent: usize,
    constraints: Vec<Vec<LinearConstraintTerm>>,
}

impl DependentNodeConstraints {
    /// Build and validate the constraint table.
    pub fn new(
        num_independent: usize,
        constraints: Vec<Vec<LinearConstraintTerm>>,
    ) -> Result<Self, AmrError> {
        for (dependent, terms) in constraints.iter().enumerate() {
            if let Some(bad) = terms.iter().find(|t| t.node >= num_independent) {
                return Err(AmrError::ConstraintIndexOutOfBounds {
                    dependent,
                    node: bad.node,
                    len: num_independent,
                });
            }
        }
        Ok(Self {
            num_independent,
            constraints,
        })
    }

    pub fn num_independent(&self) -> usize {
        self.num_independent
    }

    pub fn num_dependent(&self) -> usize {
        self.constraints.len()
    }

    /// Borrow the terms of dependent node `d`.
    pub fn terms(&self, d: usize) -> &[LinearConstraintTerm] {
        &self.constraints[d]
    }

    fn check_len(&self, values: &NodeVector) -> Result<(), AmrError> {
        let expected = self.num_independent + self.constraints.len();
        if values.num_nodes() != expected {
            return Err(AmrError::SliceLengthMismatch {
                expected: expected * values.stride(),
                found: values.as_slice().len(),
            });
        }
        Ok(())
    }

    /// Overwrite every dependent block with the weighted sum of its parents.
    pub fn set_dependent_values(&self, values: &mut NodeVector) -> Result<(), AmrError> {
        self.check_len(values)?;
        let stride = values.stride();
        let mut block = vec![0.0; stride];
        for (d, terms) in self.constraints.iter().enumerate() {
            block.fill(0.0);
            for term in terms {
                for (acc, v) in block.iter_mut().zip(values.block(term.node)) {
                    *acc += term.weight * v;
                }
            }
            values
                .block_mut(self.num_independent + d)
                .copy_from_slice(&block);
        }
        Ok(())
    }

    /// Transfer dependent-node accumulations onto their parents (the transpose
    /// of [`set_dependent_values`](Self::set_dependent_values)) and clear the
    /// dependent blocks.
    pub fn add_dependent_residual(&self, values: &mut NodeVector) -> Result<(), AmrError> {
        self.check_len(values)?;
        for (d, terms) in self.constraints.iter().enumerate() {
            let dep = values.block(self.num_independent + d).to_vec();
            for term in terms {
                for (dst, v) in values.block_mut(term.node).iter_mut().zip(&dep) {
                    *dst += term.weight * v;
                }
            }
            values.block_mut(self.num_independent + d).fill(0.0);
        }
        Ok(())
    }
}
