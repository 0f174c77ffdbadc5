//! # MSMKit Core Library
//!
//! A library for building Markov state models (MSMs) from featurised
//! molecular dynamics trajectories and comparing the metastable kinetics of
//! related systems.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains stateless data models ([`Msm`],
//!   [`MsmCollection`]), pure numerical routines (k-means clustering,
//!   Markov-chain estimation, Gaussian curve fitting), physical time units,
//!   and I/O utilities.
//!
//! - **[`engine`]: The Logic Core.** This stateful layer performs the
//!   per-system analysis steps: feature loading and clustering, lag-time
//!   model estimation with disconnected-state handling, metastable
//!   partitioning, passage-time kinetics and bootstrap convergence testing.
//!
//! - **[`workflows`]: The Public API.** This is the highest-level,
//!   user-facing layer. It fans the engine operations out over an
//!   [`MsmCollection`], so several systems can be clustered once, analysed
//!   against one reference state definition, and compared apples-to-apples.
//!
//! [`Msm`]: core::models::msm::Msm
//! [`MsmCollection`]: core::models::collection::MsmCollection

pub mod core;
pub mod engine;
pub mod workflows;
