//! Communication and mesh distribution algorithms.

pub mod collective;
pub mod communicator;
pub mod distribute;
pub mod wire;

pub use distribute::distribute_mesh;
