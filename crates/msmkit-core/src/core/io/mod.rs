//! File I/O: featurised-trajectory loading, collection snapshots, and CSV
//! result tables. Trajectory/topology formats themselves are out of scope;
//! only the minimal data each operation needs crosses this boundary.

pub mod features;
pub mod report;
pub mod snapshot;
