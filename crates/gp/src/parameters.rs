use crate::correlation_models::CorrelationModel;
use crate::errors::{GpError, Result};
use crate::mean_models::RegressionModel;
use crate::{GP_COBYLA_MAX_EVAL, GP_COBYLA_MIN_EVAL, GP_OPTIM_N_START};
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// An enum to represent the tuning of a scalar hyperparameter
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum ParamTuning<F: Float> {
    /// Constant parameter (ie given not estimated)
    Fixed(F),
    /// Parameter is optimized between given bounds (lower, upper) starting from the inital guess
    Optimized {
        /// Initial guess for the parameter
        init: F,
        /// Bounds for the parameter (lower, upper)
        bounds: (F, F),
    },
}

impl<F: Float> ParamTuning<F> {
    /// Default initial theta value
    pub const THETA_INIT: f64 = 1e-1;
    /// Default bounds for theta values
    pub const THETA_BOUNDS: (f64, f64) = (1e-2, 1e1);
    /// Default initial nugget value
    pub const NUGGET_INIT: f64 = 1e-2;
    /// Default bounds for nugget values
    pub const NUGGET_BOUNDS: (f64, f64) = (1e-6, 1e1);

    /// Default theta tuning: optimized within [`Self::THETA_BOUNDS`]
    pub fn default_theta() -> Self {
        ParamTuning::Optimized {
            init: F::cast(Self::THETA_INIT),
            bounds: (F::cast(Self::THETA_BOUNDS.0), F::cast(Self::THETA_BOUNDS.1)),
        }
    }

    /// Default nugget tuning: optimized within [`Self::NUGGET_BOUNDS`]
    pub fn default_nugget() -> Self {
        ParamTuning::Optimized {
            init: F::cast(Self::NUGGET_INIT),
            bounds: (F::cast(Self::NUGGET_BOUNDS.0), F::cast(Self::NUGGET_BOUNDS.1)),
        }
    }

    /// Get initial (or fixed) value
    pub fn init(&self) -> F {
        match self {
            ParamTuning::Fixed(v) => *v,
            ParamTuning::Optimized { init, bounds: _ } => *init,
        }
    }

    /// Get bounds when the parameter is optimized
    pub fn bounds(&self) -> Option<(F, F)> {
        match self {
            ParamTuning::Fixed(_) => None,
            ParamTuning::Optimized { init: _, bounds } => Some(*bounds),
        }
    }

    /// Whether the parameter is estimated during fitting
    pub fn is_optimized(&self) -> bool {
        matches!(self, ParamTuning::Optimized { .. })
    }

    fn check(&self, name: &str) -> Result<()> {
        let init = self.init();
        if !(init > F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "`{name}` initial value should be strictly positive, got {init}"
            )));
        }
        if let Some((lo, up)) = self.bounds() {
            if !(lo > F::zero() && lo < up) {
                return Err(GpError::InvalidValueError(format!(
                    "`{name}` bounds should satisfy 0 < lower < upper, got ({lo}, {up})"
                )));
            }
            if init < lo || init > up {
                return Err(GpError::InvalidValueError(format!(
                    "`{name}` initial value {init} is out of bounds ({lo}, {up})"
                )));
            }
        }
        Ok(())
    }
}

/// A set of validated GP parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct GpValidParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// Tuning of the inverse length scale of the correlation model
    pub(crate) theta_tuning: ParamTuning<F>,
    /// Tuning of the nugget, the noise to signal variance ratio added to
    /// the correlation matrix diagonal
    pub(crate) nugget_tuning: ParamTuning<F>,
    /// Regression model representing the mean(x)
    pub(crate) mean: Mean,
    /// Correlation model representing the spatial correlation between errors at e(x) and e(x')
    pub(crate) corr: Corr,
    /// Number of internal likelihood optimization restart
    pub(crate) n_start: usize,
    /// Max number of internal likelihood evaluation during optimization
    pub(crate) max_eval: usize,
    /// Seed of the generator drawing multistart points
    pub(crate) seed: u64,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> Default
    for GpValidParams<F, Mean, Corr>
{
    fn default() -> GpValidParams<F, Mean, Corr> {
        GpValidParams {
            theta_tuning: ParamTuning::default_theta(),
            nugget_tuning: ParamTuning::default_nugget(),
            mean: Mean::default(),
            corr: Corr::default(),
            n_start: GP_OPTIM_N_START,
            max_eval: GP_COBYLA_MAX_EVAL,
            seed: 42,
        }
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GpValidParams<F, Mean, Corr> {
    /// Get mean model
    pub fn mean(&self) -> &Mean {
        &self.mean
    }

    /// Get correlation corr k(x, x')
    pub fn corr(&self) -> &Corr {
        &self.corr
    }

    /// Get theta tuning
    pub fn theta_tuning(&self) -> &ParamTuning<F> {
        &self.theta_tuning
    }

    /// Get nugget tuning
    pub fn nugget_tuning(&self) -> &ParamTuning<F> {
        &self.nugget_tuning
    }

    /// Get the number of internal optimization restart
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the max number of internal likelihood evaluations during one optimization
    pub fn max_eval(&self) -> usize {
        self.max_eval
    }

    /// Get the multistart seed
    pub fn seed(&self) -> u64 {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the execution of
/// the [GP algorithm](struct.GaussianProcess.html).
pub struct GpParams<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>(
    GpValidParams<F, Mean, Corr>,
);

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GpParams<F, Mean, Corr> {
    /// A constructor for GP parameters given mean and correlation models
    pub fn new(mean: Mean, corr: Corr) -> GpParams<F, Mean, Corr> {
        Self(GpValidParams {
            mean,
            corr,
            ..Default::default()
        })
    }

    /// Set mean model.
    pub fn mean(mut self, mean: Mean) -> Self {
        self.0.mean = mean;
        self
    }

    /// Set correlation model.
    pub fn corr(mut self, corr: Corr) -> Self {
        self.0.corr = corr;
        self
    }

    /// Set theta hyperparameter tuning.
    ///
    /// When theta is optimized, the internal optimization is started from `init`.
    pub fn theta_tuning(mut self, theta_tuning: ParamTuning<F>) -> Self {
        self.0.theta_tuning = theta_tuning;
        self
    }

    /// Set nugget tuning.
    ///
    /// Nugget models observation noise and improves numerical stability.
    pub fn nugget_tuning(mut self, nugget_tuning: ParamTuning<F>) -> Self {
        self.0.nugget_tuning = nugget_tuning;
        self
    }

    /// Set the number of internal GP hyperparameters optimization restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of internal likelihood evaluations during one optimization
    /// Given max_eval has to be greater than [crate::GP_COBYLA_MIN_EVAL] otherwise
    /// max_eval is set to [crate::GP_COBYLA_MIN_EVAL].
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = GP_COBYLA_MIN_EVAL.max(max_eval);
        self
    }

    /// Set the seed used to draw multistart initial points
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = seed;
        self
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>>
    From<GpValidParams<F, Mean, Corr>> for GpParams<F, Mean, Corr>
{
    fn from(valid: GpValidParams<F, Mean, Corr>) -> Self {
        GpParams(valid)
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> ParamGuard
    for GpParams<F, Mean, Corr>
{
    type Checked = GpValidParams<F, Mean, Corr>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        self.0.theta_tuning.check("theta")?;
        self.0.nugget_tuning.check("nugget")?;
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation_models::SquaredExponentialCorr;
    use crate::mean_models::ConstantMean;

    type Params = GpParams<f64, ConstantMean, SquaredExponentialCorr>;

    #[test]
    fn test_default_params_are_valid() {
        let params = Params::new(ConstantMean(), SquaredExponentialCorr());
        let valid = params.check().expect("valid params");
        assert!(valid.theta_tuning().is_optimized());
        assert!(valid.nugget_tuning().is_optimized());
        assert_eq!(valid.n_start(), GP_OPTIM_N_START);
    }

    #[test]
    fn test_invalid_bounds() {
        let params = Params::new(ConstantMean(), SquaredExponentialCorr()).theta_tuning(
            ParamTuning::Optimized {
                init: 1.,
                bounds: (2., 1.),
            },
        );
        assert!(params.check_ref().is_err());
    }

    #[test]
    fn test_init_out_of_bounds() {
        let params = Params::new(ConstantMean(), SquaredExponentialCorr()).nugget_tuning(
            ParamTuning::Optimized {
                init: 100.,
                bounds: (1e-3, 1.),
            },
        );
        assert!(params.check_ref().is_err());
    }

    #[test]
    fn test_fixed_must_be_positive() {
        let params = Params::new(ConstantMean(), SquaredExponentialCorr())
            .nugget_tuning(ParamTuning::Fixed(0.));
        assert!(params.check_ref().is_err());
    }

    #[test]
    fn test_max_eval_lower_bound() {
        let valid = Params::new(ConstantMean(), SquaredExponentialCorr())
            .max_eval(1)
            .check()
            .unwrap();
        assert_eq!(valid.max_eval(), GP_COBYLA_MIN_EVAL);
    }
}
