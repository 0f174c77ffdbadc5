//! Pure numerical building blocks: k-means clustering, Markov-chain
//! estimation primitives, and the histogram Gaussian fit used by the
//! bootstrap convergence test. Nothing in this module holds analysis state.

pub mod gaussian;
pub mod kmeans;
pub mod markov;
