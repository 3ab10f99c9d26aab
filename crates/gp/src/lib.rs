//! This library implements
//! [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! also known as [Kriging](https://en.wikipedia.org/wiki/Kriging) models restricted to
//! an isotropic squared exponential correlation: the correlation between two points only
//! depends on their euclidean distance scaled by a single `theta` hyperparameter.
//!
//! A noise term (nugget) is added to the correlation matrix diagonal, it can be estimated
//! along with `theta` so that models fitted on noisy observations do not interpolate.
//!
//! GP methods are implemented by [GaussianProcess] parameterized by [GpParams].
//!
//! The `serializable` feature enables the serialization of fitted models
//! using the [`serde crate`](https://serde.rs/).
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod correlation_models;
mod errors;
pub mod mean_models;

mod parameters;
mod utils;

mod optimization;

pub use algorithm::*;
pub use errors::*;
pub use parameters::*;
pub use utils::{pairwise_sq_distances, DistanceMatrix};

/// Default number of multistart for hyperparameters optimization
pub const GP_OPTIM_N_START: usize = 2;
/// Minimum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MIN_EVAL: usize = 25;
/// Maximum of function evaluations for COBYLA optimizer
pub const GP_COBYLA_MAX_EVAL: usize = 1000;
