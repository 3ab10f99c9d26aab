//! Tables and summaries written at the end of a run.

use crate::dataset::SpatialDataset;
use crate::enumerate::{CombinationId, PredictorSet};
use crate::errors::{BmaError, Result, SkippedModel};
use crate::evaluation::{Baseline, EvaluationResult, MethodRmse};
use crate::fitting::ScoredModel;
use crate::scoring::ScoreTriple;
use crate::weighting::{Criterion, CriterionAverage};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Separator of predictor names inside a table cell
pub const PREDICTOR_SEPARATOR: char = ';';

/// One row of the model scores table
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Model identifier `m{size}_{index}`
    pub id: String,
    /// Predictor names joined with [`PREDICTOR_SEPARATOR`]
    pub predictors: String,
    /// Number of estimated parameters
    #[serde(rename = "qM")]
    pub n_params: usize,
    /// Log-likelihood
    pub log_likelihood: f64,
    /// Residual sum of squares
    pub rss: f64,
    /// BIC score
    pub bic: f64,
    /// MAP score
    pub map: f64,
    /// SPBIC score
    pub spbic: f64,
}

impl ScoreRecord {
    /// Row of a scored model
    pub fn new(set: &PredictorSet, scores: &ScoreTriple) -> Self {
        ScoreRecord {
            id: set.name(),
            predictors: set.predictors().join(&PREDICTOR_SEPARATOR.to_string()),
            n_params: scores.n_params,
            log_likelihood: scores.log_likelihood,
            rss: scores.rss,
            bic: scores.bic,
            map: scores.map,
            spbic: scores.spbic,
        }
    }

    /// Predictor set and scores back from the row
    pub fn parts(&self) -> Result<(PredictorSet, ScoreTriple)> {
        let id: CombinationId = self.id.parse()?;
        let predictors = self
            .predictors
            .split(PREDICTOR_SEPARATOR)
            .map(|p| p.trim().to_string())
            .collect();
        let scores = ScoreTriple {
            log_likelihood: self.log_likelihood,
            rss: self.rss,
            n_params: self.n_params,
            bic: self.bic,
            map: self.map,
            spbic: self.spbic,
        };
        Ok((PredictorSet::new(id, predictors)?, scores))
    }
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Write the model scores table
pub fn write_model_scores<P: AsRef<Path>>(path: P, scored: &[ScoredModel]) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for model in scored {
        writer.serialize(ScoreRecord::new(&model.set, &model.scores))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a model scores table written by [`write_model_scores`]
pub fn read_model_scores<P: AsRef<Path>>(path: P) -> Result<Vec<ScoreRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<ScoreRecord>, csv::Error>>()?;
    Ok(records)
}

/// Write observed values and averaged predictions of every criterion, one row per observation
pub fn write_predictions<P: AsRef<Path>>(
    path: P,
    dataset: &SpatialDataset,
    averages: &[CriterionAverage],
) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec![];
    if dataset.ids().is_some() {
        header.push("id".to_string());
    }
    header.extend(["latitude", "longitude", "observed"].map(String::from));
    header.extend(averages.iter().map(|a| a.weights.criterion().name().to_string()));
    writer.write_record(&header)?;

    for i in 0..dataset.n_obs() {
        let mut row = vec![];
        if let Some(ids) = dataset.ids() {
            row.push(ids[i].clone());
        }
        row.push(dataset.latitude()[i].to_string());
        row.push(dataset.longitude()[i].to_string());
        row.push(dataset.response()[i].to_string());
        row.extend(averages.iter().map(|a| a.predictions[i].to_string()));
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write RMSE of every criterion then of every ranked method
pub fn write_rmse_summary<P: AsRef<Path>>(path: P, evaluation: &EvaluationResult) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["kind", "name", "rmse", "selected"])?;
    for (criterion, rmse) in evaluation.criteria.iter() {
        writer.write_record([
            "criterion".to_string(),
            criterion.to_string(),
            rmse.to_string(),
            (*criterion == evaluation.best).to_string(),
        ])?;
    }
    for (rank, MethodRmse { method, rmse }) in evaluation.ranking.iter().enumerate() {
        writer.write_record([
            "method".to_string(),
            method.clone(),
            rmse.to_string(),
            (rank == 0).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write inclusion probabilities of every candidate predictor, one column per criterion
pub fn write_inclusion_probabilities<P: AsRef<Path>>(
    path: P,
    candidates: &[String],
    averages: &[CriterionAverage],
) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    let mut header = vec!["variable".to_string()];
    header.extend(averages.iter().map(|a| a.weights.criterion().name().to_string()));
    writer.write_record(&header)?;
    for candidate in candidates {
        let mut row = vec![candidate.clone()];
        row.extend(
            averages
                .iter()
                .map(|a| a.weights.inclusion_probability(candidate).to_string()),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Ranked list of the `n` heaviest models: `rank. name (weight) : var1, var2, ...`
pub fn top_models_text(average: &CriterionAverage, n: usize) -> String {
    average
        .weights
        .top(n)
        .iter()
        .enumerate()
        .map(|(i, m)| {
            format!(
                "{}. {} ({:.6}) : {}\n",
                i + 1,
                m.set.name(),
                m.weight,
                m.set.predictors().join(", ")
            )
        })
        .collect()
}

/// Write `top_models_{criterion}.txt` files in `dir`
pub fn write_top_models<P: AsRef<Path>>(
    dir: P,
    averages: &[CriterionAverage],
    n: usize,
) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    for average in averages {
        let path = dir.join(format!("top_models_{}.txt", average.weights.criterion().name()));
        let mut file = fs::File::create(path)?;
        file.write_all(top_models_text(average, n).as_bytes())?;
    }
    Ok(())
}

/// Counts and outcome of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of candidate predictors
    pub n_candidates: usize,
    /// Number of predictor sets enumerated
    pub n_enumerated: usize,
    /// Number of models successfully fitted
    pub n_fitted: usize,
    /// Number of models successfully scored
    pub n_scored: usize,
    /// Models left out with the reason
    pub skipped: Vec<SkippedModel>,
    /// Whether the run was interrupted
    pub cancelled: bool,
    /// Selected criterion
    pub best: Option<Criterion>,
    /// RMSE of every criterion
    pub criteria_rmse: Vec<MethodRmse>,
    /// Methods ranking
    pub ranking: Vec<MethodRmse>,
}

impl RunSummary {
    /// Log the summary
    pub fn log(&self) {
        log::info!(
            "{} predictor sets enumerated, {} models fitted, {} scored, {} skipped",
            self.n_enumerated,
            self.n_fitted,
            self.n_scored,
            self.skipped.len()
        );
        for skipped in self.skipped.iter() {
            log::info!("  skipped {} ({}): {}", skipped.model, skipped.kind, skipped.reason);
        }
        if let Some(best) = self.best {
            log::info!("Selected criterion: {best}");
        }
    }
}

/// Write the run summary as JSON
pub fn write_run_summary<P: AsRef<Path>>(path: P, summary: &RunSummary) -> Result<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, summary)?;
    Ok(())
}

/// Read baseline predictions (e.g. GWR) from the `column` of a CSV table, rows in dataset order
pub fn read_baseline_predictions<P: AsRef<Path>>(
    path: P,
    name: &str,
    column: &str,
) -> Result<Baseline> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let index = headers.iter().position(|h| h == column).ok_or_else(|| {
        BmaError::Dataset(format!("column `{column}` not found in {}", path.display()))
    })?;
    let mut values = vec![];
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let cell = record.get(index).unwrap_or_default().trim();
        let value = cell
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                BmaError::Dataset(format!(
                    "{}: row {}, column `{column}`: `{cell}` is not a number",
                    path.display(),
                    row + 1
                ))
            })?;
        values.push(value);
    }
    Ok(Baseline {
        name: name.to_string(),
        predictions: Array1::from_vec(values),
    })
}
