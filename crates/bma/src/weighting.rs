//! Model weighting and averaging (GPR-BMA core).
//!
//! For each criterion, scores of the valid models are turned into a probability
//! distribution with a softmax shifted by the best score:
//! `exp(-0.5 (s - min s))` for BIC and SPBIC, `exp(s - max s)` for MAP.
//! The averaged prediction is the weighted sum of the models predictions.

use crate::enumerate::{CombinationId, PredictorSet};
use crate::errors::{BmaError, Result};
use crate::scoring::ScoreTriple;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model selection criterion
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Criterion {
    /// Bayesian information criterion
    Bic,
    /// Laplace approximation of the model posterior
    Map,
    /// Scaled prior BIC
    Spbic,
}

impl Criterion {
    /// Every criterion, in report order
    pub const ALL: [Criterion; 3] = [Criterion::Bic, Criterion::Map, Criterion::Spbic];

    /// Lower case name used in file names and table headers
    pub fn name(&self) -> &'static str {
        match self {
            Criterion::Bic => "bic",
            Criterion::Map => "map",
            Criterion::Spbic => "spbic",
        }
    }

    /// Whether lower scores are better for this criterion
    pub fn lower_is_better(&self) -> bool {
        !matches!(self, Criterion::Map)
    }

    /// Score of a model for this criterion
    pub fn score(&self, scores: &ScoreTriple) -> f64 {
        match self {
            Criterion::Bic => scores.bic,
            Criterion::Map => scores.map,
            Criterion::Spbic => scores.spbic,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Criterion::Bic => write!(f, "BIC"),
            Criterion::Map => write!(f, "MAP"),
            Criterion::Spbic => write!(f, "SPBIC"),
        }
    }
}

impl FromStr for Criterion {
    type Err = BmaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bic" => Ok(Criterion::Bic),
            "map" => Ok(Criterion::Map),
            "spbic" => Ok(Criterion::Spbic),
            _ => Err(BmaError::InvalidValue(format!(
                "unknown criterion `{s}`, expected bic, map or spbic"
            ))),
        }
    }
}

/// Normalized weights from the scores of one criterion.
///
/// Scores have to be finite; fails with `NoValidModel` when empty.
pub fn model_weights(criterion: Criterion, scores: &[f64]) -> Result<Array1<f64>> {
    if scores.is_empty() {
        return Err(BmaError::NoValidModel);
    }
    if let Some(s) = scores.iter().find(|s| !s.is_finite()) {
        return Err(BmaError::InvalidValue(format!(
            "{criterion} score {s} is not finite"
        )));
    }
    let scores = Array1::from_vec(scores.to_vec());
    let unnormalized = if criterion.lower_is_better() {
        let best = scores.fold(f64::INFINITY, |m, s| m.min(*s));
        scores.mapv(|s| (-0.5 * (s - best)).exp())
    } else {
        let best = scores.fold(f64::NEG_INFINITY, |m, s| m.max(*s));
        scores.mapv(|s| (s - best).exp())
    };
    // best model weight is exp(0) = 1, total >= 1
    let total = unnormalized.sum();
    Ok(unnormalized / total)
}

/// A model taking part to the averaging: its subset, scores and predictions
#[derive(Clone, Debug)]
pub struct Candidate<'a> {
    /// Predictor subset of the model
    pub set: &'a PredictorSet,
    /// Model scores
    pub scores: &'a ScoreTriple,
    /// Predictions of the model at every observation
    pub predictions: &'a Array1<f64>,
}

/// Weight of one model for one criterion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelWeight {
    /// Predictor subset of the model
    pub set: PredictorSet,
    /// Normalized weight
    pub weight: f64,
}

/// Probability distribution over the valid models of one criterion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    criterion: Criterion,
    models: Vec<ModelWeight>,
}

impl WeightVector {
    /// Criterion the weights derive from
    pub fn criterion(&self) -> Criterion {
        self.criterion
    }

    /// Weighted models in candidate order
    pub fn models(&self) -> &[ModelWeight] {
        &self.models
    }

    /// Weights in candidate order
    pub fn weights(&self) -> Array1<f64> {
        self.models.iter().map(|m| m.weight).collect()
    }

    /// Weight of a given model, `None` when it is not part of the distribution
    pub fn weight_of(&self, id: CombinationId) -> Option<f64> {
        self.models
            .iter()
            .find(|m| m.set.id() == id)
            .map(|m| m.weight)
    }

    /// Models sorted by decreasing weight (ties by identifier), at most `n`
    pub fn top(&self, n: usize) -> Vec<&ModelWeight> {
        let mut ranked: Vec<&ModelWeight> = self.models.iter().collect();
        ranked.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.set.id().cmp(&b.set.id()))
        });
        ranked.truncate(n);
        ranked
    }

    /// Sum of model weights over models including `predictor`
    pub fn inclusion_probability(&self, predictor: &str) -> f64 {
        self.models
            .iter()
            .filter(|m| m.set.contains(predictor))
            .map(|m| m.weight)
            .sum()
    }
}

/// Result of the averaging for one criterion
#[derive(Clone, Debug, PartialEq)]
pub struct CriterionAverage {
    /// Model weights
    pub weights: WeightVector,
    /// Weighted prediction at every observation
    pub predictions: Array1<f64>,
}

/// Weight valid candidates for `criterion` and average their predictions.
///
/// Candidates with a non finite score or a prediction vector of the wrong size
/// are left out, the weights of the others are normalized without them.
/// Returns `None` when no candidate is valid.
pub fn average(
    criterion: Criterion,
    candidates: &[Candidate],
    n_obs: usize,
) -> Option<CriterionAverage> {
    let valid: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| criterion.score(c.scores).is_finite() && c.predictions.len() == n_obs)
        .collect();
    if valid.len() < candidates.len() {
        log::warn!(
            "{criterion}: {} model(s) excluded from weighting",
            candidates.len() - valid.len()
        );
    }
    let scores: Vec<f64> = valid.iter().map(|c| criterion.score(c.scores)).collect();
    let weights = model_weights(criterion, &scores).ok()?;

    let mut predictions = Array1::<f64>::zeros(n_obs);
    for (c, w) in valid.iter().zip(weights.iter()) {
        predictions.scaled_add(*w, c.predictions);
    }
    let models = valid
        .iter()
        .zip(weights.iter())
        .map(|(c, w)| ModelWeight {
            set: c.set.clone(),
            weight: *w,
        })
        .collect();
    Some(CriterionAverage {
        weights: WeightVector { criterion, models },
        predictions,
    })
}

/// Inclusion probability of each candidate predictor, in candidate order
pub fn inclusion_probabilities(
    candidates: &[String],
    weights: &WeightVector,
) -> Vec<(String, f64)> {
    candidates
        .iter()
        .map(|c| (c.clone(), weights.inclusion_probability(c)))
        .collect()
}
