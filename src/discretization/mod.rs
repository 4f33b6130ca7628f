//! Nine-node quadrilateral basis, quadrature and surface geometry.

pub mod quad9;

pub use quad9::{
    ENRICHMENT_SIZE, NUM_NODES, ShapeTabulation, SurfaceFrame, enrichment, gauss3x3,
    node_location, shape_functions,
};
