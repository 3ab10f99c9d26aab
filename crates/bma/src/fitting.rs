//! Fan-out of one fit + predict + score task per predictor subset.

use crate::dataset::SpatialDataset;
use crate::enumerate::PredictorSet;
use crate::errors::{BmaError, Result, SkipKind, SkippedModel};
use crate::scoring::{ScoreTriple, Scorer};
use crate::surrogate::SurrogateFitter;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared flag used to interrupt a run
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token not cancelled yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation: tasks not started yet are skipped
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A model fitted on a predictor subset
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FittedModel<M> {
    /// Predictor subset the model was trained on
    pub set: PredictorSet,
    /// Number of estimated parameters (qM)
    pub n_params: usize,
    /// Fitted model state
    pub model: M,
}

/// A scored model and its in-sample predictions
#[derive(Clone, Debug)]
pub struct ScoredModel {
    /// Predictor subset of the model
    pub set: PredictorSet,
    /// Model scores
    pub scores: ScoreTriple,
    /// Prediction at every observation
    pub predictions: Array1<f64>,
}

/// Options of the fitting stage
#[derive(Clone, Debug)]
pub struct FitOptions {
    /// Worker threads, rayon default when `None`
    pub n_threads: Option<usize>,
    /// Keep fitted model states (needed to save them)
    pub retain_models: bool,
    /// Log progress every `log_every` processed subsets
    pub log_every: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            n_threads: None,
            retain_models: false,
            log_every: 500,
        }
    }
}

/// Outcome of the fitting stage, in enumeration order
#[derive(Debug)]
pub struct ModelRuns<M> {
    /// Successfully fitted and scored models
    pub scored: Vec<ScoredModel>,
    /// Fitted model states when retained, same order as `scored`
    pub models: Vec<FittedModel<M>>,
    /// Models left out, with the reason
    pub skipped: Vec<SkippedModel>,
    /// Whether the stage was interrupted
    pub cancelled: bool,
}

impl<M> ModelRuns<M> {
    /// Number of fitted models (scored or not)
    pub fn n_fitted(&self) -> usize {
        self.scored.len()
            + self
                .skipped
                .iter()
                .filter(|s| s.kind == SkipKind::NumericDegeneracy)
                .count()
    }
}

enum TaskOutcome<M> {
    Scored(ScoredModel, Option<FittedModel<M>>),
    Skipped(SkippedModel),
}

/// Fit a model on the subset features of the dataset.
/// Missing predictors and fit errors are reported as `MissingPredictor` and `FitFailure`.
pub fn fit_model<S: SurrogateFitter>(
    fitter: &S,
    dataset: &SpatialDataset,
    set: &PredictorSet,
) -> Result<FittedModel<S::Model>> {
    let x = dataset.features(set)?;
    fit_features(fitter, &x, dataset.response(), set)
}

fn fit_features<S: SurrogateFitter>(
    fitter: &S,
    x: &Array2<f64>,
    y: &Array1<f64>,
    set: &PredictorSet,
) -> Result<FittedModel<S::Model>> {
    let fit_failure = |err: BmaError| BmaError::FitFailure {
        model: set.name(),
        reason: err.to_string(),
    };
    let model = fitter.fit(x, y).map_err(fit_failure)?;
    Ok(FittedModel {
        set: set.clone(),
        n_params: fitter.parameter_count(&model),
        model,
    })
}

/// Predict at every observation with a fitted model.
/// A stored subset not matching the dataset gives `InclusionMismatch`.
pub fn predict_model<S: SurrogateFitter>(
    fitter: &S,
    dataset: &SpatialDataset,
    fitted: &FittedModel<S::Model>,
) -> Result<Array1<f64>> {
    let mismatch = |field: String| BmaError::InclusionMismatch {
        model: fitted.set.name(),
        field,
    };
    let x = dataset.features(&fitted.set).map_err(|err| match err {
        BmaError::MissingPredictor { field, .. } => mismatch(field),
        err => err,
    })?;
    fitter
        .predict(&fitted.model, &x)
        .map_err(|err| mismatch(err.to_string()))
}

fn run_task<S: SurrogateFitter>(
    fitter: &S,
    scorer: &Scorer,
    dataset: &SpatialDataset,
    set: &PredictorSet,
    retain: bool,
) -> Result<TaskOutcome<S::Model>> {
    let outcome = dataset.features(set).and_then(|x| {
        let fitted = fit_features(fitter, &x, dataset.response(), set)?;
        let predictions = fitter
            .predict(&fitted.model, &x)
            .map_err(|err| BmaError::FitFailure {
                model: set.name(),
                reason: err.to_string(),
            })?;
        let scores = scorer.score(&set.name(), dataset.response(), &predictions, fitted.n_params)?;
        Ok((fitted, predictions, scores))
    });
    match outcome {
        Ok((fitted, predictions, scores)) => {
            log::debug!(
                "{} fitted: qM={} loglik={:.4} BIC={:.4} MAP={:.4} SPBIC={:.4}",
                set.name(),
                scores.n_params,
                scores.log_likelihood,
                scores.bic,
                scores.map,
                scores.spbic
            );
            let scored = ScoredModel {
                set: set.clone(),
                scores,
                predictions,
            };
            Ok(TaskOutcome::Scored(scored, retain.then_some(fitted)))
        }
        Err(err) => {
            let skipped = SkippedModel::from_error(set.name(), err)?;
            log::warn!("{} skipped: {}", skipped.model, skipped.reason);
            Ok(TaskOutcome::Skipped(skipped))
        }
    }
}

/// Fit, predict and score one model per predictor subset on a bounded thread pool.
///
/// Failures local to a model are recorded as skipped models; results keep the
/// enumeration order whatever the scheduling. Once `cancel` is raised, subsets not
/// started yet are reported as cancelled.
pub fn fit_and_score<S: SurrogateFitter>(
    fitter: &S,
    scorer: &Scorer,
    dataset: &SpatialDataset,
    sets: &[PredictorSet],
    options: &FitOptions,
    cancel: &CancelToken,
) -> Result<ModelRuns<S::Model>> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = options.n_threads {
        builder = builder.num_threads(n);
    }
    let pool = builder
        .build()
        .map_err(|err| BmaError::InvalidValue(format!("thread pool: {err}")))?;

    let total = sets.len();
    let done = AtomicUsize::new(0);
    let log_every = options.log_every.max(1);
    let now = Instant::now();
    log::info!(
        "Fitting {total} models on {} threads",
        pool.current_num_threads()
    );

    let outcomes: Vec<Result<TaskOutcome<S::Model>>> = pool.install(|| {
        sets.par_iter()
            .map(|set| {
                if cancel.is_cancelled() {
                    return Ok(TaskOutcome::Skipped(SkippedModel::cancelled(set.name())));
                }
                let outcome = run_task(fitter, scorer, dataset, set, options.retain_models);
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n % log_every == 0 || n == total {
                    log::info!(
                        "{n}/{total} models processed ({:.1}s)",
                        now.elapsed().as_secs_f64()
                    );
                }
                outcome
            })
            .collect()
    });

    let mut runs = ModelRuns {
        scored: vec![],
        models: vec![],
        skipped: vec![],
        cancelled: false,
    };
    for outcome in outcomes {
        match outcome? {
            TaskOutcome::Scored(scored, fitted) => {
                runs.scored.push(scored);
                runs.models.extend(fitted);
            }
            TaskOutcome::Skipped(skipped) => runs.skipped.push(skipped),
        }
    }
    // a cancel raised after the last task started leaves the run complete
    runs.cancelled = runs.skipped.iter().any(|s| s.kind == SkipKind::Cancelled);
    log::info!(
        "{} models scored, {} skipped",
        runs.scored.len(),
        runs.skipped.len()
    );
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::{enumerate, CombinationId};
    use ndarray::Axis;

    /// Least squares line on the first column, fails on request
    struct LineFitter;

    impl SurrogateFitter for LineFitter {
        type Model = (f64, f64);

        fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(f64, f64)> {
            let xc = x.column(0);
            let (xm, ym) = (xc.mean().unwrap_or(0.), y.mean().unwrap_or(0.));
            let sxx = xc.mapv(|v| (v - xm) * (v - xm)).sum();
            if sxx == 0. {
                return Err(BmaError::InvalidValue("constant input".to_string()));
            }
            let sxy = xc
                .iter()
                .zip(y.iter())
                .map(|(a, b)| (a - xm) * (b - ym))
                .sum::<f64>();
            let slope = sxy / sxx;
            Ok((ym - slope * xm, slope))
        }

        fn predict(&self, model: &(f64, f64), x: &Array2<f64>) -> Result<Array1<f64>> {
            Ok(x.column(0).mapv(|v| model.0 + model.1 * v))
        }

        fn parameter_count(&self, _model: &(f64, f64)) -> usize {
            2
        }
    }

    /// Line fitter raising the cancel token once a model is fitted
    struct CancellingFitter(CancelToken);

    impl SurrogateFitter for CancellingFitter {
        type Model = (f64, f64);

        fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(f64, f64)> {
            let model = LineFitter.fit(x, y)?;
            self.0.cancel();
            Ok(model)
        }

        fn predict(&self, model: &(f64, f64), x: &Array2<f64>) -> Result<Array1<f64>> {
            LineFitter.predict(model, x)
        }

        fn parameter_count(&self, _model: &(f64, f64)) -> usize {
            2
        }
    }

    fn dataset() -> SpatialDataset {
        let a = Array1::linspace(0., 1., 8);
        let b = a.mapv(|v: f64| (5. * v).cos());
        let c = Array1::from_elem(8, 2.);
        let y = &a * 2. + &b * 0.1;
        let features = ndarray::stack![Axis(1), a, b, c];
        SpatialDataset::new(
            vec!["A".to_string(), "B".to_string(), "C".to_string()],
            features,
            y,
            Array1::zeros(8),
            Array1::zeros(8),
        )
        .unwrap()
        .with_candidates(["A", "B", "C", "D"].iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_fit_and_score_skips_local_failures() {
        let ds = dataset();
        let sets = enumerate(ds.candidates(), 1..=1).unwrap();
        let runs = fit_and_score(
            &LineFitter,
            &Scorer::default(),
            &ds,
            &sets,
            &FitOptions {
                retain_models: true,
                ..FitOptions::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
        let names: Vec<String> = runs.scored.iter().map(|s| s.set.name()).collect();
        assert_eq!(names, vec!["m1_1", "m1_2"]);
        assert_eq!(runs.models.len(), 2);
        let kinds: Vec<SkipKind> = runs.skipped.iter().map(|s| s.kind).collect();
        // C is constant (fit failure), D is not a dataset column
        assert_eq!(kinds, vec![SkipKind::FitFailure, SkipKind::MissingPredictor]);
        assert!(!runs.cancelled);
    }

    #[test]
    fn test_models_not_retained_by_default() {
        let ds = dataset();
        let sets = enumerate(&ds.candidates()[..2], 1..=2).unwrap();
        let runs = fit_and_score(
            &LineFitter,
            &Scorer::default(),
            &ds,
            &sets,
            &FitOptions::default(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(runs.scored.len(), 3);
        assert!(runs.models.is_empty());
    }

    #[test]
    fn test_cancelled_run() {
        let ds = dataset();
        let sets = enumerate(ds.candidates(), 1..=2).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let runs = fit_and_score(
            &LineFitter,
            &Scorer::default(),
            &ds,
            &sets,
            &FitOptions {
                n_threads: Some(2),
                ..FitOptions::default()
            },
            &cancel,
        )
        .unwrap();
        assert!(runs.cancelled);
        assert!(runs.scored.is_empty());
        assert!(runs.skipped.iter().all(|s| s.kind == SkipKind::Cancelled));
    }

    #[test]
    fn test_cancel_during_run_keeps_finished_models() {
        let ds = dataset();
        let sets = enumerate(&ds.candidates()[..2], 1..=2).unwrap();
        let cancel = CancelToken::new();
        let runs = fit_and_score(
            &CancellingFitter(cancel.clone()),
            &Scorer::default(),
            &ds,
            &sets,
            &FitOptions {
                n_threads: Some(1),
                ..FitOptions::default()
            },
            &cancel,
        )
        .unwrap();
        assert!(runs.cancelled);
        assert_eq!(runs.scored.len(), 1);
        assert_eq!(runs.skipped.len(), 2);
        assert!(runs.skipped.iter().all(|s| s.kind == SkipKind::Cancelled));
    }

    #[test]
    fn test_cancel_after_last_task_is_not_an_interruption() {
        let ds = dataset();
        let sets = enumerate(&ds.candidates()[..1], 1..=1).unwrap();
        let cancel = CancelToken::new();
        let runs = fit_and_score(
            &CancellingFitter(cancel.clone()),
            &Scorer::default(),
            &ds,
            &sets,
            &FitOptions::default(),
            &cancel,
        )
        .unwrap();
        assert!(cancel.is_cancelled());
        assert!(!runs.cancelled);
        assert_eq!(runs.scored.len(), 1);
        assert!(runs.skipped.is_empty());
    }

    #[test]
    fn test_predict_inclusion_mismatch() {
        let ds = dataset();
        let id = CombinationId { size: 1, index: 4 };
        let set = PredictorSet::new(id, vec!["D".to_string()]).unwrap();
        let fitted = FittedModel {
            set,
            n_params: 2,
            model: (0., 1.),
        };
        assert!(matches!(
            predict_model(&LineFitter, &ds, &fitted),
            Err(BmaError::InclusionMismatch { .. })
        ));
    }
}
