#![cfg_attr(docsrs, feature(doc_cfg))]
//! # amr-estimator
//!
//! amr-estimator estimates the discretization error of a finite-element
//! solution on a partitioned mesh of nine-node quadrilaterals and turns the
//! estimate into refinement flags for a quadtree/octree forest. It works in
//! serial, on in-process thread ranks, and over MPI.
//!
//! ## Pipeline
//! - Nodal weights: the number of elements sharing each node, summed on owners
//! - Derivative recovery: weighted averages of element gradients at the nodes
//! - Element reconstruction: a least-squares cubic enrichment fitted to the
//!   recovered derivatives
//! - Indicators: strain-energy difference or adjoint-weighted residual
//! - Refinement: mean-threshold marking, flag gather to a root rank, and tree
//!   refinement there
//!
//! [`adapt::estimate_and_refine`] runs one full cycle.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! amr-estimator = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ## Determinism
//!
//! Global sums are formed on rank 0 in rank order and broadcast, so every rank
//! sees bitwise identical totals and thresholds for a fixed rank count.

pub mod adapt;
pub mod algs;
pub mod data;
pub mod discretization;
pub mod forest;
pub mod mesh_error;
pub mod mesh_generation;
pub mod physics;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::adapt::refinement::{ElementPartition, RefinementTarget};
    pub use crate::adapt::{
        AdaptOptions, EstimateReport, EstimatorKind, estimate_and_refine,
    };
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::distribute::distribute_mesh;
    pub use crate::data::local_mesh::LocalMesh;
    pub use crate::data::node_vector::NodeVector;
    pub use crate::forest::{Forest, OctForest, QuadForest, Tree};
    pub use crate::mesh_error::AmrError;
    pub use crate::mesh_generation::GlobalMesh;
    pub use crate::physics::fe::{BodyLoadQuad9, ElementResidual, LaplaceQuad9, PlaneStressQuad9};
}
