//! Model scoring with BIC, MAP (Laplace approximation) and SPBIC criteria.
//!
//! Given in-sample residuals of a fitted model over the n observations:
//!
//! * log-likelihood = -0.5 (n ln(RSS/n) + n ln(2 pi)),
//! * BIC = log-likelihood - (qM/2) ln(n),
//! * MAP = log-likelihood - 0.5 log|H| - (qM/2) ln(2 pi),
//! * SPBIC = log-likelihood - (qM/2) ln(n) + ln(g(qM)),
//!
//! where qM is the number of estimated parameters of the model.
//! `log|H|` and `g` are given by [`HessianPolicy`] and [`ComplexityPolicy`].

use crate::errors::{BmaError, Result};
use ndarray::{ArrayBase, Data, Ix1};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::Debug;

/// Log determinant of the log-posterior Hessian at the fitted parameters
pub trait HessianPolicy: Debug + Send + Sync {
    /// log|H| for a model with `n_params` parameters fitted on `n_obs` observations
    fn log_det_hessian(&self, n_params: usize, n_obs: usize) -> f64;
}

/// Model complexity scaling function g(qM) used by SPBIC
pub trait ComplexityPolicy: Debug + Send + Sync {
    /// g(qM), has to be strictly positive
    fn g(&self, n_params: usize) -> f64;
}

/// H = I (qM x qM), log|H| = 0
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityHessian;

impl HessianPolicy for IdentityHessian {
    fn log_det_hessian(&self, _n_params: usize, _n_obs: usize) -> f64 {
        0.
    }
}

/// H = c.I (qM x qM), log|H| = qM ln(c)
#[derive(Clone, Copy, Debug)]
pub struct ScaledIdentityHessian(pub f64);

impl HessianPolicy for ScaledIdentityHessian {
    fn log_det_hessian(&self, n_params: usize, _n_obs: usize) -> f64 {
        n_params as f64 * self.0.ln()
    }
}

/// g(qM) = qM
#[derive(Clone, Copy, Debug, Default)]
pub struct LinearComplexity;

impl ComplexityPolicy for LinearComplexity {
    fn g(&self, n_params: usize) -> f64 {
        n_params as f64
    }
}

/// g(qM) = 1, SPBIC reduces to BIC
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitComplexity;

impl ComplexityPolicy for UnitComplexity {
    fn g(&self, _n_params: usize) -> f64 {
        1.
    }
}

/// Built-in Hessian policies selectable from configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum HessianSpec {
    /// [`IdentityHessian`]
    #[default]
    Identity,
    /// [`ScaledIdentityHessian`]
    ScaledIdentity(f64),
}

impl HessianSpec {
    /// Policy instance
    pub fn policy(&self) -> Box<dyn HessianPolicy> {
        match self {
            HessianSpec::Identity => Box::new(IdentityHessian),
            HessianSpec::ScaledIdentity(c) => Box::new(ScaledIdentityHessian(*c)),
        }
    }
}

/// Built-in complexity policies selectable from configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplexitySpec {
    /// [`LinearComplexity`]
    #[default]
    Linear,
    /// [`UnitComplexity`]
    Unit,
}

impl ComplexitySpec {
    /// Policy instance
    pub fn policy(&self) -> Box<dyn ComplexityPolicy> {
        match self {
            ComplexitySpec::Linear => Box::new(LinearComplexity),
            ComplexitySpec::Unit => Box::new(UnitComplexity),
        }
    }
}

/// Scores of one fitted model along with the quantities they derive from
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreTriple {
    /// Gaussian log-likelihood of the in-sample residuals
    pub log_likelihood: f64,
    /// Residual sum of squares
    pub rss: f64,
    /// Number of estimated parameters (qM)
    pub n_params: usize,
    /// Bayesian information criterion
    pub bic: f64,
    /// Laplace approximation of the model posterior
    pub map: f64,
    /// Scaled prior BIC
    pub spbic: f64,
}

/// Sum of squared residuals (observed - predicted)
pub fn residual_sum_of_squares(
    observed: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    predicted: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> f64 {
    observed
        .iter()
        .zip(predicted.iter())
        .map(|(o, p)| (o - p) * (o - p))
        .sum()
}

/// Gaussian log-likelihood of i.i.d. residuals with variance RSS/n.
/// Returns `None` when RSS is not strictly positive and finite.
pub fn log_likelihood(rss: f64, n_obs: usize) -> Option<f64> {
    if !(rss.is_finite() && rss > 0.) || n_obs == 0 {
        return None;
    }
    let n = n_obs as f64;
    Some(-0.5 * (n * (rss / n).ln() + n * (2. * PI).ln()))
}

/// Scores fitted models given Hessian and complexity policies
#[derive(Debug)]
pub struct Scorer {
    hessian: Box<dyn HessianPolicy>,
    complexity: Box<dyn ComplexityPolicy>,
}

impl Default for Scorer {
    fn default() -> Self {
        Scorer {
            hessian: Box::new(IdentityHessian),
            complexity: Box::new(LinearComplexity),
        }
    }
}

impl Scorer {
    /// Scorer with given policies
    pub fn new(hessian: Box<dyn HessianPolicy>, complexity: Box<dyn ComplexityPolicy>) -> Self {
        Scorer {
            hessian,
            complexity,
        }
    }

    /// Set the Hessian policy used by MAP
    pub fn hessian(mut self, hessian: Box<dyn HessianPolicy>) -> Self {
        self.hessian = hessian;
        self
    }

    /// Set the complexity policy used by SPBIC
    pub fn complexity(mut self, complexity: Box<dyn ComplexityPolicy>) -> Self {
        self.complexity = complexity;
        self
    }

    /// Score `model` given observed values and its predictions at the same points
    pub fn score(
        &self,
        model: &str,
        observed: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        predicted: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        n_params: usize,
    ) -> Result<ScoreTriple> {
        if observed.len() != predicted.len() {
            return Err(BmaError::InvalidValue(format!(
                "model {model}: {} predictions for {} observations",
                predicted.len(),
                observed.len()
            )));
        }
        let rss = residual_sum_of_squares(observed, predicted);
        self.score_rss(model, rss, observed.len(), n_params)
    }

    /// Score `model` given its residual sum of squares over `n_obs` observations
    pub fn score_rss(
        &self,
        model: &str,
        rss: f64,
        n_obs: usize,
        n_params: usize,
    ) -> Result<ScoreTriple> {
        let degenerate = |reason: String| BmaError::NumericDegeneracy {
            model: model.to_string(),
            reason,
        };
        let log_likelihood = log_likelihood(rss, n_obs)
            .ok_or_else(|| degenerate(format!("residual sum of squares is {rss}")))?;
        let n = n_obs as f64;
        let q = n_params as f64;
        let g = self.complexity.g(n_params);
        if !(g > 0.) {
            return Err(degenerate(format!("complexity g({n_params}) = {g} is not positive")));
        }
        let log_det_h = self.hessian.log_det_hessian(n_params, n_obs);

        let bic = log_likelihood - 0.5 * q * n.ln();
        let map = log_likelihood - 0.5 * log_det_h - 0.5 * q * (2. * PI).ln();
        let spbic = log_likelihood - 0.5 * q * n.ln() + g.ln();

        for (name, v) in [("BIC", bic), ("MAP", map), ("SPBIC", spbic)] {
            if !v.is_finite() {
                return Err(degenerate(format!("{name} score is {v}")));
            }
        }
        Ok(ScoreTriple {
            log_likelihood,
            rss,
            n_params,
            bic,
            map,
            spbic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_log_likelihood() {
        // n = 4, RSS = 4 => RSS/n = 1
        let ll = log_likelihood(4., 4).unwrap();
        assert_abs_diff_eq!(ll, -2. * (2. * PI).ln(), epsilon = 1e-12);
        assert!(log_likelihood(0., 4).is_none());
        assert!(log_likelihood(-1., 4).is_none());
        assert!(log_likelihood(f64::NAN, 4).is_none());
    }

    #[test]
    fn test_default_scores() {
        let observed = array![1., 2., 3., 4.];
        let predicted = array![1.5, 1.5, 3.5, 3.5];
        let scores = Scorer::default().score("m1_1", &observed, &predicted, 5).unwrap();
        let ll = log_likelihood(1., 4).unwrap();
        assert_abs_diff_eq!(scores.rss, 1., epsilon = 1e-12);
        assert_abs_diff_eq!(scores.log_likelihood, ll, epsilon = 1e-12);
        assert_abs_diff_eq!(scores.bic, ll - 2.5 * 4f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(scores.map, ll - 2.5 * (2. * PI).ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(scores.spbic, scores.bic + 5f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_policy_substitution() {
        let scorer = Scorer::default()
            .hessian(Box::new(ScaledIdentityHessian(2.)))
            .complexity(Box::new(UnitComplexity));
        let base = Scorer::default().score_rss("m", 2., 10, 3).unwrap();
        let scores = scorer.score_rss("m", 2., 10, 3).unwrap();
        assert_abs_diff_eq!(scores.spbic, scores.bic, epsilon = 1e-12);
        assert_abs_diff_eq!(scores.bic, base.bic, epsilon = 1e-12);
        assert_abs_diff_eq!(scores.map, base.map - 1.5 * 2f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_degenerate_fit() {
        let observed = array![1., 2., 3.];
        let res = Scorer::default().score("m2_4", &observed, &observed, 4);
        match res {
            Err(BmaError::NumericDegeneracy { model, .. }) => assert_eq!(model, "m2_4"),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[derive(Debug)]
    struct ZeroComplexity;
    impl ComplexityPolicy for ZeroComplexity {
        fn g(&self, _n_params: usize) -> f64 {
            0.
        }
    }

    #[test]
    fn test_non_positive_complexity() {
        let scorer = Scorer::default().complexity(Box::new(ZeroComplexity));
        assert!(matches!(
            scorer.score_rss("m", 1., 5, 2),
            Err(BmaError::NumericDegeneracy { .. })
        ));
    }

    #[test]
    fn test_specs() {
        assert_eq!(HessianSpec::Identity.policy().log_det_hessian(4, 10), 0.);
        assert_eq!(ComplexitySpec::Unit.policy().g(7), 1.);
        assert_eq!(ComplexitySpec::Linear.policy().g(7), 7.);
    }
}
