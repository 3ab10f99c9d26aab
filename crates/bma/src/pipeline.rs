//! GPR-BMA orchestration: enumerate, fit, score, weight, evaluate, export.
//!
//! ```no_run
//! use geobma_bma::{DatasetColumns, GprBmaFactory, SpatialDataset};
//!
//! let dataset = SpatialDataset::from_csv("boston.csv", &DatasetColumns::default())?;
//! let bma = GprBmaFactory::new()
//!     .configure(|config| config.max_size(3).outdir("results"))
//!     .kriging();
//! let result = bma.run(&dataset, &[])?;
//! bma.export(&result, &dataset)?;
//! # Ok::<(), geobma_bma::BmaError>(())
//! ```
use crate::config::BmaConfig;
use crate::dataset::SpatialDataset;
use crate::enumerate::{enumerate, CombinationId, PredictorSet};
use crate::errors::{BmaError, Result, SkippedModel};
use crate::evaluation::{bma_method_name, evaluate, Baseline, EvaluationResult, MethodRmse};
use crate::fitting::{
    fit_and_score, fit_model, predict_model, CancelToken, FitOptions, FittedModel, ModelRuns,
    ScoredModel,
};
use crate::persistence::{save_models, save_predictor_sets};
use crate::report::{self, RunSummary, ScoreRecord};
use crate::scoring::Scorer;
use crate::surrogate::{KrigingFitter, SurrogateFitter};
use crate::weighting::{average, Candidate, Criterion, CriterionAverage};
use crate::{
    CONFIG_FILE, FITTED_MODELS_FILE, INCLUSION_FILE, MODEL_SCORES_FILE, PREDICTIONS_FILE,
    PREDICTOR_SETS_FILE, RMSE_SUMMARY_FILE, RUN_SUMMARY_FILE,
};
use log::info;
use rayon::prelude::*;
use std::collections::HashMap;
use std::time::Instant;

type ReplayOutcome = std::result::Result<ScoredModel, SkippedModel>;

/// Name of the plain GPR baseline method
pub const GPR_METHOD: &str = "GPR";

/// GPR-BMA builder allowing to set the configuration, the scorer and the cancel token
#[derive(Debug, Default)]
pub struct GprBmaFactory {
    config: BmaConfig,
    scorer: Option<Scorer>,
    cancel: CancelToken,
}

impl GprBmaFactory {
    /// Builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration of the run
    pub fn configure<F: FnOnce(BmaConfig) -> BmaConfig>(mut self, init: F) -> Self {
        self.config = init(self.config);
        self
    }

    /// Scorer with custom Hessian and complexity policies, overrides the configured built-ins
    pub fn scorer(mut self, scorer: Scorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Share a cancel token with the caller (e.g. raised by a signal handler)
    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build a GPR-BMA averaging isotropic squared exponential GPs fitted
    /// with the configured GP settings
    pub fn kriging(self) -> GprBma<KrigingFitter> {
        let fitter = KrigingFitter::new(self.config.gp.clone());
        self.fitter(fitter)
    }

    /// Build a GPR-BMA averaging models of the given fitter
    pub fn fitter<S: SurrogateFitter>(self, fitter: S) -> GprBma<S> {
        let scorer = self.scorer.unwrap_or_else(|| {
            Scorer::new(self.config.hessian.policy(), self.config.complexity.policy())
        });
        GprBma {
            fitter,
            config: self.config,
            scorer,
            cancel: self.cancel,
        }
    }
}

/// Outcome of a GPR-BMA run
#[derive(Debug)]
pub struct BmaResult<M> {
    /// Candidate predictors
    pub candidates: Vec<String>,
    /// Enumerated predictor sets
    pub sets: Vec<PredictorSet>,
    /// Scored models, enumeration order
    pub scored: Vec<ScoredModel>,
    /// Fitted models when retained
    pub models: Vec<FittedModel<M>>,
    /// Weights and averaged predictions of every criterion having valid models
    pub averages: Vec<CriterionAverage>,
    /// RMSE evaluation and ranking
    pub evaluation: EvaluationResult,
    /// Counts and skipped models
    pub summary: RunSummary,
}

impl<M> BmaResult<M> {
    /// Weights and predictions of a given criterion
    pub fn average_of(&self, criterion: Criterion) -> Option<&CriterionAverage> {
        self.averages
            .iter()
            .find(|a| a.weights.criterion() == criterion)
    }

    /// Inclusion probability of every candidate for a given criterion
    pub fn inclusion_probabilities(&self, criterion: Criterion) -> Option<Vec<(String, f64)>> {
        self.average_of(criterion)
            .map(|a| crate::weighting::inclusion_probabilities(&self.candidates, &a.weights))
    }
}

/// GPR-BMA runner
#[derive(Debug)]
pub struct GprBma<S: SurrogateFitter> {
    fitter: S,
    config: BmaConfig,
    scorer: Scorer,
    cancel: CancelToken,
}

impl<S: SurrogateFitter> GprBma<S> {
    /// Run configuration
    pub fn config(&self) -> &BmaConfig {
        &self.config
    }

    /// Token cancelling the run when raised
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Model fitter
    pub fn fitter(&self) -> &S {
        &self.fitter
    }

    /// Run GPR-BMA on every predictor subset of the dataset candidates.
    ///
    /// `baselines` are external predictions (e.g. GWR) ranked along with GPR-BMA,
    /// the plain GPR baseline is added when configured.
    pub fn run(
        &self,
        dataset: &SpatialDataset,
        baselines: &[Baseline],
    ) -> Result<BmaResult<S::Model>> {
        self.config.check()?;
        let now = Instant::now();
        let candidates = dataset.candidates().to_vec();
        if candidates.is_empty() {
            return Err(BmaError::EmptyCandidates);
        }
        let sizes = self.config.size_range(candidates.len())?;
        let sets = enumerate(&candidates, sizes)?;
        info!(
            "GPR-BMA over {} predictor sets from {} candidates, {} observations",
            sets.len(),
            candidates.len(),
            dataset.n_obs()
        );

        let options = FitOptions {
            n_threads: self.config.n_threads,
            retain_models: self.config.save_models.is_some(),
            log_every: self.config.log_every,
        };
        let runs = fit_and_score(
            &self.fitter,
            &self.scorer,
            dataset,
            &sets,
            &options,
            &self.cancel,
        )?;
        if runs.cancelled {
            if !self.config.allow_partial {
                return Err(BmaError::Cancelled);
            }
            log::warn!(
                "Run cancelled, averaging over the {} models scored so far",
                runs.scored.len()
            );
        }
        let n_fitted = runs.n_fitted();

        let mut all_baselines = vec![];
        if self.config.gpr_baseline && !runs.cancelled {
            all_baselines.extend(self.gpr_baseline(dataset, &candidates));
        }
        all_baselines.extend(baselines.iter().cloned());

        let result = self.conclude(dataset, candidates, sets, runs, n_fitted, &all_baselines)?;
        info!("GPR-BMA run done in {:.1}s", now.elapsed().as_secs_f64());
        Ok(result)
    }

    /// Recompute weights, averaged predictions and evaluation from persisted models
    /// and their score records, without refitting.
    ///
    /// Models whose predictors do not match the dataset are excluded and the weights
    /// of the others renormalized.
    pub fn replay(
        &self,
        dataset: &SpatialDataset,
        models: Vec<FittedModel<S::Model>>,
        records: &[ScoreRecord],
        baselines: &[Baseline],
    ) -> Result<BmaResult<S::Model>> {
        self.config.check()?;
        let by_id = records
            .iter()
            .map(|r| Ok((r.id.parse::<CombinationId>()?, r)))
            .collect::<Result<HashMap<_, _>>>()?;
        let outcomes: Vec<Result<ReplayOutcome>> = models
            .par_iter()
            .map(|fitted| -> Result<ReplayOutcome> {
                let record = by_id.get(&fitted.set.id()).ok_or_else(|| {
                    BmaError::InvalidValue(format!(
                        "no score record for model {}",
                        fitted.set.name()
                    ))
                })?;
                let (set, scores) = record.parts()?;
                if set != fitted.set {
                    let field = set
                        .predictors()
                        .iter()
                        .find(|p| !fitted.set.contains(p))
                        .cloned()
                        .unwrap_or_default();
                    let err = BmaError::InclusionMismatch {
                        model: fitted.set.name(),
                        field,
                    };
                    return SkippedModel::from_error(fitted.set.name(), err).map(Err);
                }
                match predict_model(&self.fitter, dataset, fitted) {
                    Ok(predictions) => Ok(Ok(ScoredModel {
                        set: fitted.set.clone(),
                        scores,
                        predictions,
                    })),
                    Err(err) => SkippedModel::from_error(fitted.set.name(), err).map(Err),
                }
            })
            .collect();

        let mut runs = ModelRuns {
            scored: vec![],
            models: vec![],
            skipped: vec![],
            cancelled: false,
        };
        for outcome in outcomes {
            match outcome? {
                Ok(scored) => runs.scored.push(scored),
                Err(skipped) => {
                    log::warn!("{} excluded: {}", skipped.model, skipped.reason);
                    runs.skipped.push(skipped)
                }
            }
        }
        let n_fitted = models.len();
        runs.models = models;
        let sets = runs.models.iter().map(|m| m.set.clone()).collect();
        self.conclude(
            dataset,
            dataset.candidates().to_vec(),
            sets,
            runs,
            n_fitted,
            baselines,
        )
    }

    /// Write every artifact of the run in the configured output directory
    pub fn export(&self, result: &BmaResult<S::Model>, dataset: &SpatialDataset) -> Result<()> {
        let outdir = &self.config.outdir;
        std::fs::create_dir_all(outdir)?;
        self.config.save(outdir.join(CONFIG_FILE))?;
        save_predictor_sets(&result.sets, outdir.join(PREDICTOR_SETS_FILE))?;
        report::write_model_scores(outdir.join(MODEL_SCORES_FILE), &result.scored)?;
        report::write_predictions(outdir.join(PREDICTIONS_FILE), dataset, &result.averages)?;
        report::write_rmse_summary(outdir.join(RMSE_SUMMARY_FILE), &result.evaluation)?;
        report::write_inclusion_probabilities(
            outdir.join(INCLUSION_FILE),
            &result.candidates,
            &result.averages,
        )?;
        report::write_top_models(outdir, &result.averages, self.config.top_n)?;
        report::write_run_summary(outdir.join(RUN_SUMMARY_FILE), &result.summary)?;
        if let Some(format) = self.config.save_models {
            let path = outdir.join(format!("{FITTED_MODELS_FILE}.{}", format.extension()));
            save_models(&result.models, path, format)?;
        }
        info!("Results written in {}", outdir.display());
        Ok(())
    }

    fn gpr_baseline(&self, dataset: &SpatialDataset, candidates: &[String]) -> Option<Baseline> {
        let predictors: Vec<String> = candidates
            .iter()
            .filter(|c| dataset.has_column(c))
            .cloned()
            .collect();
        let id = CombinationId {
            size: predictors.len(),
            index: 1,
        };
        let fitted = PredictorSet::new(id, predictors)
            .and_then(|set| fit_model(&self.fitter, dataset, &set))
            .and_then(|fitted| predict_model(&self.fitter, dataset, &fitted));
        match fitted {
            Ok(predictions) => Some(Baseline {
                name: GPR_METHOD.to_string(),
                predictions,
            }),
            Err(err) => {
                log::warn!("{GPR_METHOD} baseline not available: {err}");
                None
            }
        }
    }

    fn conclude(
        &self,
        dataset: &SpatialDataset,
        candidates: Vec<String>,
        sets: Vec<PredictorSet>,
        runs: ModelRuns<S::Model>,
        n_fitted: usize,
        baselines: &[Baseline],
    ) -> Result<BmaResult<S::Model>> {
        let pool: Vec<Candidate> = runs
            .scored
            .iter()
            .map(|s| Candidate {
                set: &s.set,
                scores: &s.scores,
                predictions: &s.predictions,
            })
            .collect();
        let averages: Vec<CriterionAverage> = Criterion::ALL
            .iter()
            .filter_map(|c| average(*c, &pool, dataset.n_obs()))
            .collect();
        if averages.is_empty() {
            return Err(BmaError::NoValidModel);
        }
        let evaluation = evaluate(
            dataset.response(),
            &averages,
            baselines,
            &self.config.tie_break,
        )?;

        let summary = RunSummary {
            n_candidates: candidates.len(),
            n_enumerated: sets.len(),
            n_fitted,
            n_scored: runs.scored.len(),
            skipped: runs.skipped,
            cancelled: runs.cancelled,
            best: Some(evaluation.best),
            criteria_rmse: evaluation
                .criteria
                .iter()
                .map(|(c, rmse)| MethodRmse {
                    method: bma_method_name(*c),
                    rmse: *rmse,
                })
                .collect(),
            ranking: evaluation.ranking.clone(),
        };
        summary.log();
        Ok(BmaResult {
            candidates,
            sets,
            scored: runs.scored,
            models: runs.models,
            averages,
            evaluation,
            summary,
        })
    }
}
