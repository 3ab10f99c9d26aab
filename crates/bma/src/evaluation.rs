//! RMSE based evaluation: best criterion selection and methods ranking.

use crate::errors::{BmaError, Result};
use crate::weighting::{Criterion, CriterionAverage};
use ndarray::{Array1, ArrayBase, Data, Ix1};
use ndarray_stats::DeviationExt;
use serde::{Deserialize, Serialize};

/// Root mean squared error between observed and predicted values
pub fn rmse(
    observed: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    predicted: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> Result<f64> {
    observed
        .root_mean_sq_err(predicted)
        .map_err(|err| BmaError::InvalidValue(format!("RMSE computation: {err}")))
}

/// Deterministic tie-break of the best criterion selection.
///
/// Criteria whose RMSE is within `tolerance` of the smallest one are tied,
/// the first of them in `priority` order wins. Criteria missing from
/// `priority` come after, in [`Criterion::ALL`] order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TieBreak {
    /// Preference order among tied criteria
    pub priority: Vec<Criterion>,
    /// Absolute RMSE difference under which criteria are tied
    pub tolerance: f64,
}

impl Default for TieBreak {
    fn default() -> Self {
        TieBreak {
            priority: Criterion::ALL.to_vec(),
            tolerance: 0.,
        }
    }
}

impl TieBreak {
    /// Check the tolerance is a non negative number
    pub fn check(&self) -> Result<()> {
        if !(self.tolerance >= 0.) {
            return Err(BmaError::Config(format!(
                "tie-break tolerance must be non negative, got {}",
                self.tolerance
            )));
        }
        Ok(())
    }

    fn rank(&self, criterion: Criterion) -> usize {
        self.priority
            .iter()
            .position(|c| *c == criterion)
            .unwrap_or_else(|| {
                self.priority.len()
                    + Criterion::ALL
                        .iter()
                        .position(|c| *c == criterion)
                        .unwrap_or(Criterion::ALL.len())
            })
    }
}

/// Criterion with the smallest RMSE, `None` when `rmses` is empty
pub fn select_best(rmses: &[(Criterion, f64)], tie_break: &TieBreak) -> Option<Criterion> {
    let min = rmses
        .iter()
        .map(|(_, r)| *r)
        .filter(|r| !r.is_nan())
        .fold(None, |acc: Option<f64>, r| Some(acc.map_or(r, |m| m.min(r))))?;
    rmses
        .iter()
        .filter(|(_, r)| *r - min <= tie_break.tolerance.max(0.))
        .min_by_key(|(c, _)| tie_break.rank(*c))
        .map(|(c, _)| *c)
}

/// Predictions of a competing method (plain GPR, GWR...)
#[derive(Clone, Debug)]
pub struct Baseline {
    /// Method name
    pub name: String,
    /// Prediction at every observation
    pub predictions: Array1<f64>,
}

/// RMSE of a method
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodRmse {
    /// Method name (`GPR-BMA (MAP)`, `GPR`, `GWR`...)
    pub method: String,
    /// Root mean squared error
    pub rmse: f64,
}

/// Terminal evaluation of a run
#[derive(Clone, Debug)]
pub struct EvaluationResult {
    /// RMSE per criterion having a result
    pub criteria: Vec<(Criterion, f64)>,
    /// Selected criterion
    pub best: Criterion,
    /// Averaged predictions of the selected criterion
    pub best_predictions: Array1<f64>,
    /// Methods sorted by ascending RMSE (GPR-BMA with the best criterion and baselines)
    pub ranking: Vec<MethodRmse>,
}

impl EvaluationResult {
    /// RMSE of a given criterion
    pub fn rmse_of(&self, criterion: Criterion) -> Option<f64> {
        self.criteria
            .iter()
            .find(|(c, _)| *c == criterion)
            .map(|(_, r)| *r)
    }
}

/// Method name of GPR-BMA with a given criterion
pub fn bma_method_name(criterion: Criterion) -> String {
    format!("GPR-BMA ({criterion})")
}

/// Compute RMSE of every criterion average and baseline, select the best criterion
/// and rank methods.
pub fn evaluate(
    observed: &Array1<f64>,
    averages: &[CriterionAverage],
    baselines: &[Baseline],
    tie_break: &TieBreak,
) -> Result<EvaluationResult> {
    let criteria = averages
        .iter()
        .map(|avg| Ok((avg.weights.criterion(), rmse(observed, &avg.predictions)?)))
        .collect::<Result<Vec<_>>>()?;
    let best = select_best(&criteria, tie_break).ok_or(BmaError::NoValidModel)?;
    let best_predictions = averages
        .iter()
        .find(|avg| avg.weights.criterion() == best)
        .map(|avg| avg.predictions.to_owned())
        .ok_or(BmaError::NoValidModel)?;

    let mut ranking = vec![MethodRmse {
        method: bma_method_name(best),
        rmse: rmse(observed, &best_predictions)?,
    }];
    for baseline in baselines {
        if baseline.predictions.len() != observed.len() {
            return Err(BmaError::InvalidValue(format!(
                "{} baseline has {} predictions for {} observations",
                baseline.name,
                baseline.predictions.len(),
                observed.len()
            )));
        }
        ranking.push(MethodRmse {
            method: baseline.name.clone(),
            rmse: rmse(observed, &baseline.predictions)?,
        });
    }
    ranking.sort_by(|a, b| a.rmse.total_cmp(&b.rmse));

    for (i, m) in ranking.iter().enumerate() {
        log::info!("#{} {}: RMSE = {:.6}", i + 1, m.method, m.rmse);
    }
    Ok(EvaluationResult {
        criteria,
        best,
        best_predictions,
        ranking,
    })
}
