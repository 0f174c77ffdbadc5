//! Stateful analysis logic operating on a single [`Msm`](crate::core::models::msm::Msm):
//! configuration, clustering, model estimation, metastable partitioning,
//! passage-time kinetics and bootstrap convergence testing. Collection-wide
//! orchestration lives in [`crate::workflows`].

pub mod bootstrap;
pub mod cluster;
pub mod config;
pub mod error;
pub mod estimator;
pub mod kinetics;
pub mod pcca;
