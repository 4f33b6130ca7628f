//! Ownership of mesh nodes across ranks.

pub mod ownership;

pub use ownership::{NodeOwnership, OwnershipEntry};
