//! AmrError: unified error type for amr-estimator public APIs
//!
//! Every fallible operation in the crate returns this error. Fatal conditions
//! that one rank detects are made collective before they are returned, so all
//! ranks of a refinement cycle fail together instead of blocking in a later
//! collective call.

use thiserror::Error;

/// Unified error type for estimation and refinement operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AmrError {
    /// One or more independent nodes are referenced by no element (corrupted mesh).
    #[error("Topology error: {count} node(s) are not referenced by any element")]
    OrphanNodes { count: usize },
    /// A connectivity entry names a node outside the local node range.
    #[error("Invalid connectivity: element {element} references node {node}, but only {len} local nodes exist")]
    NodeIndexOutOfBounds {
        element: usize,
        node: usize,
        len: usize,
    },
    /// A dependent-node constraint refers to a parent that is not an independent node.
    #[error("Constraint on dependent node {dependent} refers to node {node}, outside 0..{len}")]
    ConstraintIndexOutOfBounds {
        dependent: usize,
        node: usize,
        len: usize,
    },
    /// A strided buffer did not have the length implied by its node count and stride.
    #[error("Slice length mismatch: expected {expected}, found {found}")]
    SliceLengthMismatch { expected: usize, found: usize },
    /// An exchange plan asked this rank for a node it does not own.
    #[error("Rank {rank} requested global node {node}, which is not owned here")]
    UnknownGlobalNode { rank: usize, node: u64 },
    /// A point-to-point transfer failed or delivered a malformed payload.
    #[error("Communication error with rank {neighbor}: {source}")]
    CommError { neighbor: usize, r#source: String },
    /// The partition map does not cover the global element count.
    #[error("Partition map has {found} entries, expected {expected}")]
    PartitionSizeMismatch { expected: usize, found: usize },
    /// The partition map names a rank outside the communicator.
    #[error("Partition map assigns element {element} to rank {rank}, but only {size} ranks exist")]
    PartitionRankOutOfRange {
        element: usize,
        rank: usize,
        size: usize,
    },
    /// A rank sent a different number of flags than the partition map assigns to it.
    #[error("Rank {rank} contributed {gathered} flags, but the partition map assigns it {partitioned} elements")]
    RankElementCountMismatch {
        rank: usize,
        gathered: usize,
        partitioned: usize,
    },
    /// The flag consumed for a global element carried a different element id.
    #[error("Ordering violation: flag for global element {element} (rank {rank}) carries element id {found}")]
    PartitionOrderMismatch {
        element: usize,
        rank: usize,
        found: u64,
    },
    /// The number of flags does not match the number of cells in the forest.
    #[error("Refinement flags cover {flags} cells, but the forest holds {cells}")]
    FlagCountMismatch { flags: usize, cells: usize },
    /// Level bounds are not ordered or exceed the maximum tree depth.
    #[error("Invalid refinement levels: min {min}, max {max} (limit {limit})")]
    InvalidLevels { min: u8, max: u8, limit: u8 },
    /// An element's geometry has a singular surface Jacobian.
    #[error("Degenerate element geometry: {0}")]
    DegenerateGeometry(String),
    /// The element kind and the mesh disagree on the number of variables per node.
    #[error("Element has {element} variables per node, mesh has {mesh}")]
    VarsPerNodeMismatch { mesh: usize, element: usize },
    /// A root-only input (partition map, forest) was not supplied on the root rank.
    #[error("Missing input on the root rank: {0}")]
    MissingRootInput(&'static str),
    /// A configuration value is out of range.
    #[error("Invalid option: {0}")]
    InvalidOption(String),
    /// The global mesh description is inconsistent.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),
}
