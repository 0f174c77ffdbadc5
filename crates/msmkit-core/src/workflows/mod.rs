//! High-level entry points: collection-wide analysis pipelines composed from
//! the engine layer.

pub mod analysis;
