//! Approximate nearest-neighbour search over exemplar vectors

pub mod hnsw;
pub mod metric;

pub use hnsw::{HnswIndex, HnswParams, Neighbor};
pub use metric::{normalize, Metric};
