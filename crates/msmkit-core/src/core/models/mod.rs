//! # Core Models Module
//!
//! Data structures describing an analysed system and its derived artifacts:
//!
//! - [`msm`] - One system's analysis state: features, clustering, discrete
//!   trajectories, the built model and every cached downstream result.
//! - [`model`] - The estimated lag-time Markov model itself.
//! - [`collection`] - An arena of MSMs sharing one clustering, addressed by
//!   title.
//! - [`ids`] - Arena key types.
//!
//! These are plain serializable data; the logic that fills them lives in
//! [`crate::engine`].

pub mod collection;
pub mod ids;
pub mod model;
pub mod msm;
