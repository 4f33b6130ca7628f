//! Data module: nodal storage, constraints and exchange plans

pub mod hanging_node_constraints;
pub mod local_mesh;
pub mod node_distribute;
pub mod node_vector;

pub use hanging_node_constraints::{DependentNodeConstraints, LinearConstraintTerm};
pub use local_mesh::LocalMesh;
pub use node_distribute::NodeDistribute;
pub use node_vector::NodeVector;
