//! This library implements GPR-BMA: a Bayesian model averaging of Gaussian process
//! regressions fitted on every subset of a list of candidate predictors of a spatial
//! dataset.
//!
//! For K candidates, the 2^K - 1 non empty subsets are enumerated and one GP is fitted
//! per subset. Each fitted model is scored with three criteria:
//! * BIC, the Bayesian information criterion,
//! * MAP, a Laplace approximation of the model posterior,
//! * SPBIC, a scaled prior BIC.
//!
//! For each criterion, scores are turned into model weights and the models predictions
//! are averaged. The criterion giving the smallest RMSE is selected and compared to
//! competing methods (a plain GPR using every candidate, external GWR predictions...).
//!
//! # Example
//!
//! ```no_run
//! use geobma_bma::{Criterion, DatasetColumns, GprBmaFactory, SpatialDataset};
//!
//! let columns = DatasetColumns {
//!     predictors: ["CRIM", "RM", "LSTAT"].map(String::from).to_vec(),
//!     ..DatasetColumns::default()
//! };
//! let dataset = SpatialDataset::from_csv("boston.csv", &columns)?;
//! let bma = GprBmaFactory::new()
//!     .configure(|config| config.n_threads(4).top_n(5))
//!     .kriging();
//! let result = bma.run(&dataset, &[])?;
//! println!("Best criterion: {}", result.evaluation.best);
//! for (name, p) in result.inclusion_probabilities(Criterion::Bic).unwrap_or_default() {
//!     println!("P({name}) = {p:.3}");
//! }
//! # Ok::<(), geobma_bma::BmaError>(())
//! ```
//!
//! Fitting is parallelized with [rayon](https://docs.rs/rayon), models failing to fit
//! or to be scored are skipped and reported in the [RunSummary].
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod config;
mod dataset;
mod enumerate;
mod errors;
mod evaluation;
mod fitting;
mod persistence;
mod pipeline;
mod report;
mod scoring;
mod surrogate;
mod weighting;

pub use config::*;
pub use dataset::*;
pub use enumerate::*;
pub use errors::*;
pub use evaluation::*;
pub use fitting::*;
pub use persistence::*;
pub use pipeline::*;
pub use report::*;
pub use scoring::*;
pub use surrogate::*;
pub use weighting::*;

/// Env variable to set the log level (`GEOBMA_LOG=debug`)
pub const GEOBMA_LOG: &str = "GEOBMA_LOG";

/// Json filename for the run configuration
pub const CONFIG_FILE: &str = "geobma_config.json";
/// Json filename for enumerated predictor sets
pub const PREDICTOR_SETS_FILE: &str = "predictor_sets.json";
/// Basename of the fitted models file, extension given by the format
pub const FITTED_MODELS_FILE: &str = "fitted_models";
/// Csv filename for model scores
pub const MODEL_SCORES_FILE: &str = "model_scores.csv";
/// Csv filename for averaged predictions
pub const PREDICTIONS_FILE: &str = "predictions.csv";
/// Csv filename for RMSE of criteria and methods
pub const RMSE_SUMMARY_FILE: &str = "rmse_summary.csv";
/// Csv filename for predictors inclusion probabilities
pub const INCLUSION_FILE: &str = "inclusion_probabilities.csv";
/// Json filename for the run summary
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
