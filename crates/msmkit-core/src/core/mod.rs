//! # Core Module
//!
//! Foundations of the library: stateless data models for Markov state models
//! and their collections, pure numerical routines (clustering, Markov-chain
//! estimation, curve fitting), physical time units, and file I/O.
//!
//! Nothing here orchestrates an analysis; that is the job of [`crate::engine`]
//! and [`crate::workflows`].

pub mod io;
pub mod math;
pub mod models;
pub mod units;
