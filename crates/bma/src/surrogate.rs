//! Regression models averaged by GPR-BMA.
//!
//! The averaging core only sees a model through [`SurrogateFitter`]:
//! fit on a feature matrix, predict, report a parameter count.

use crate::errors::{BmaError, Result};
use geobma_gp::correlation_models::SquaredExponentialCorr;
use geobma_gp::mean_models::{ConstantMean, LinearMean};
use geobma_gp::{GaussianProcess, GpParams, ParamTuning};
use linfa::prelude::{Dataset, Fit};
use ndarray::{Array1, Array2};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// A regression method fitted once per predictor subset
pub trait SurrogateFitter: Sync {
    /// Fitted model state, opaque to the averaging core
    type Model: Send + Sync + Serialize + DeserializeOwned;

    /// Fit a model given training inputs (n, nx) and outputs (n,)
    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self::Model>;

    /// Predict n outputs at given (n, nx) inputs, deterministic for a given model
    fn predict(&self, model: &Self::Model, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Number of estimated parameters of the fitted model
    fn parameter_count(&self, model: &Self::Model) -> usize;
}

/// Trend of the GP
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeanKind {
    /// Constant trend (ordinary kriging)
    Constant,
    /// Affine trend (universal kriging)
    #[default]
    Linear,
}

impl fmt::Display for MeanKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MeanKind::Constant => write!(f, "constant"),
            MeanKind::Linear => write!(f, "linear"),
        }
    }
}

/// GP fitting settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpSettings {
    /// Trend model
    pub mean: MeanKind,
    /// Inverse length scale tuning
    pub theta: ParamTuning<f64>,
    /// Nugget tuning
    pub nugget: ParamTuning<f64>,
    /// Number of likelihood optimization starts
    pub n_start: usize,
    /// Max number of likelihood evaluations per start
    pub max_eval: usize,
    /// Seed of the multistart points generator
    pub seed: u64,
}

impl Default for GpSettings {
    fn default() -> Self {
        GpSettings {
            mean: MeanKind::default(),
            theta: ParamTuning::default_theta(),
            nugget: ParamTuning::default_nugget(),
            n_start: geobma_gp::GP_OPTIM_N_START,
            max_eval: 200,
            seed: 42,
        }
    }
}

/// A fitted isotropic squared exponential GP
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum KrigingModel {
    /// GP with constant trend
    Constant(GaussianProcess<f64, ConstantMean, SquaredExponentialCorr>),
    /// GP with affine trend
    Linear(GaussianProcess<f64, LinearMean, SquaredExponentialCorr>),
}

macro_rules! dispatch {
    ($model:expr, $gp:ident => $body:expr) => {
        match $model {
            KrigingModel::Constant($gp) => $body,
            KrigingModel::Linear($gp) => $body,
        }
    };
}

impl KrigingModel {
    /// Predict output values at (n, nx) points
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        dispatch!(self, gp => Ok(gp.predict(x)?))
    }

    /// Estimated parameters count
    pub fn n_params(&self) -> usize {
        dispatch!(self, gp => gp.n_params())
    }

    /// Inverse length scale
    pub fn theta(&self) -> f64 {
        dispatch!(self, gp => gp.theta())
    }

    /// Noise to signal ratio
    pub fn nugget(&self) -> f64 {
        dispatch!(self, gp => gp.nugget())
    }

    /// Input dimension
    pub fn input_dim(&self) -> usize {
        dispatch!(self, gp => gp.dims().0)
    }
}

impl fmt::Display for KrigingModel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        dispatch!(self, gp => write!(f, "{gp}"))
    }
}

/// [`SurrogateFitter`] fitting [`KrigingModel`]s
#[derive(Clone, Debug, Default)]
pub struct KrigingFitter {
    settings: GpSettings,
}

impl KrigingFitter {
    /// Constructor
    pub fn new(settings: GpSettings) -> Self {
        KrigingFitter { settings }
    }

    /// GP settings
    pub fn settings(&self) -> &GpSettings {
        &self.settings
    }

    fn params<Mean: geobma_gp::mean_models::RegressionModel<f64>>(
        &self,
        mean: Mean,
    ) -> GpParams<f64, Mean, SquaredExponentialCorr> {
        GaussianProcess::<f64, Mean, SquaredExponentialCorr>::params(mean, SquaredExponentialCorr())
            .theta_tuning(self.settings.theta)
            .nugget_tuning(self.settings.nugget)
            .n_start(self.settings.n_start)
            .max_eval(self.settings.max_eval)
            .seed(self.settings.seed)
    }
}

impl SurrogateFitter for KrigingFitter {
    type Model = KrigingModel;

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<KrigingModel> {
        let dataset = Dataset::new(x.to_owned(), y.to_owned());
        let model = match self.settings.mean {
            MeanKind::Constant => {
                KrigingModel::Constant(self.params(ConstantMean()).fit(&dataset)?)
            }
            MeanKind::Linear => KrigingModel::Linear(self.params(LinearMean()).fit(&dataset)?),
        };
        Ok(model)
    }

    fn predict(&self, model: &KrigingModel, x: &Array2<f64>) -> Result<Array1<f64>> {
        if x.ncols() != model.input_dim() {
            return Err(BmaError::InvalidValue(format!(
                "model trained on {} predictors, got {}",
                model.input_dim(),
                x.ncols()
            )));
        }
        model.predict(x)
    }

    fn parameter_count(&self, model: &KrigingModel) -> usize {
        model.n_params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array, Axis};

    #[test]
    fn test_kriging_fitter() {
        let x = Array::linspace(0., 4., 12).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v: f64| 0.5 * v + (2. * v).sin());
        let fitter = KrigingFitter::default();
        let model = fitter.fit(&x, &y).unwrap();
        // linear trend: 2 weights + theta + variance + nugget
        assert_eq!(fitter.parameter_count(&model), 5);
        let yp = fitter.predict(&model, &x).unwrap();
        assert_abs_diff_eq!(y, yp, epsilon = 0.2);
        assert!(fitter.predict(&model, &array![[1., 2.]]).is_err());
    }

    #[test]
    fn test_constant_mean_settings() {
        let x = Array::linspace(0., 1., 6).insert_axis(Axis(1));
        let y = x.column(0).mapv(|v| v * v);
        let fitter = KrigingFitter::new(GpSettings {
            mean: MeanKind::Constant,
            nugget: ParamTuning::Fixed(1e-6),
            ..GpSettings::default()
        });
        let model = fitter.fit(&x, &y).unwrap();
        assert!(matches!(model, KrigingModel::Constant(_)));
        assert_eq!(fitter.parameter_count(&model), 3);
        assert_eq!(model.nugget(), 1e-6);
    }

    #[test]
    fn test_settings_serde() {
        let settings = GpSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let loaded: GpSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(settings, loaded);
        let partial: GpSettings = serde_json::from_str(r#"{"mean": "Constant"}"#).unwrap();
        assert_eq!(partial.mean, MeanKind::Constant);
        assert_eq!(partial.n_start, GpSettings::default().n_start);
    }
}
