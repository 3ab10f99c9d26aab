use crate::correlation_models::*;
use crate::errors::{GpError, Result};
use crate::mean_models::*;
use crate::optimization::{optimize_params, prepare_multistart, CobylaParams};
use crate::parameters::{GpParams, GpValidParams, ParamTuning};
use crate::utils::{pairwise_sq_distances, DistanceMatrix, NormalizedData};
use crate::GP_COBYLA_MIN_EVAL;

use linfa::prelude::{DatasetBase, Fit, Float};
use linfa_linalg::{cholesky::*, qr::*, svd::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};

use log::debug;
use rayon::prelude::*;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Internal parameters computed Gp during training
/// used later on in prediction computations
#[derive(Default, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(deserialize = "F: Deserialize<'de>"))
)]
pub(crate) struct GpInnerParams<F: Float> {
    /// Gaussian process variance
    sigma2: F,
    /// Generalized least-squares regression weights
    beta: Array2<F>,
    /// Gaussian Process weights
    gamma: Array2<F>,
}

impl<F: Float> Clone for GpInnerParams<F> {
    fn clone(&self) -> Self {
        Self {
            sigma2: self.sigma2,
            beta: self.beta.to_owned(),
            gamma: self.gamma.to_owned(),
        }
    }
}

/// A GP regression is an algorithm which takes as input a training dataset and
/// builds a model `y = mu(x) + Z(x)` where `mu(x)` is a [RegressionModel] trend
/// and `Z(x)` a zero mean gaussian process with covariance
/// `sigma2 * (r(x, x') + nugget * delta(x, x'))`, `r` being the isotropic
/// [CorrelationModel] parameterized by a single `theta`.
///
/// Inputs and outputs are standardized before fitting. `theta` and the nugget are
/// either given or estimated by maximizing the reduced likelihood,
/// `sigma2` and the trend weights are then computed in closed form.
///
/// Only what is needed to predict is kept in the fitted model (trend and GP weights,
/// normalization factors and the training inputs), so that thousands of models can
/// be held at once.
///
/// # Example
///
/// ```no_run
/// use geobma_gp::{correlation_models::*, mean_models::*, GaussianProcess};
/// use linfa::prelude::*;
/// use ndarray::{arr2, Array, Axis};
///
/// let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
/// let yt = xt.column(0).mapv(|v: f64| v.sin());
///
/// let gp = GaussianProcess::<f64, LinearMean, SquaredExponentialCorr>::params(
///     LinearMean::default(),
///     SquaredExponentialCorr::default(),
/// )
/// .fit(&Dataset::new(xt, yt))
/// .expect("GP fit error");
///
/// let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
/// let ytest = gp.predict(&xtest).expect("prediction error");
/// ```
#[derive(Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(
        serialize = "F: Serialize, Mean: Serialize, Corr: Serialize",
        deserialize = "F: Deserialize<'de>, Mean: Deserialize<'de>, Corr: Deserialize<'de>"
    ))
)]
pub struct GaussianProcess<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> {
    /// Parameter of the correlation model equal to the inverse of length scale
    theta: F,
    /// Noise to signal variance ratio
    nugget: F,
    /// Reduced likelihood value (result from internal optimization)
    likelihood: F,
    /// Gaussian process internal fitted params
    inner_params: GpInnerParams<F>,
    /// Training inputs
    xt_norm: NormalizedData<F>,
    /// Training outputs
    yt_norm: NormalizedData<F>,
    /// Parameters used to fit this model
    pub(crate) params: GpValidParams<F, Mean, Corr>,
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> Clone
    for GaussianProcess<F, Mean, Corr>
{
    fn clone(&self) -> Self {
        Self {
            theta: self.theta,
            nugget: self.nugget,
            likelihood: self.likelihood,
            inner_params: self.inner_params.clone(),
            xt_norm: self.xt_norm.clone(),
            yt_norm: self.yt_norm.clone(),
            params: self.params.clone(),
        }
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> fmt::Display
    for GaussianProcess<F, Mean, Corr>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(mean={}, corr={}, theta={}, nugget={}, variance={}, likelihood={})",
            self.params.mean,
            self.params.corr,
            self.theta,
            self.nugget,
            self.inner_params.sigma2,
            self.likelihood,
        )
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>> GaussianProcess<F, Mean, Corr> {
    /// Gp parameters contructor
    pub fn params<NewMean: RegressionModel<F>, NewCorr: CorrelationModel<F>>(
        mean: NewMean,
        corr: NewCorr,
    ) -> GpParams<F, NewMean, NewCorr> {
        GpParams::new(mean, corr)
    }

    /// Predict output values at n given `x` points of nx components specified as a (n, nx) matrix.
    /// Returns n scalar output values as a vector (n,).
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<Array1<F>> {
        if x.ncols() != self.xt_norm.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "Prediction points should have {} components, got {}",
                self.xt_norm.ncols(),
                x.ncols()
            )));
        }
        let xnorm = self.xt_norm.apply(x);
        // Compute the mean term at x
        let f = self.params.mean.value(&xnorm);
        // Compute the correlation term at x
        let sq_dist = pairwise_sq_distances(&xnorm, &self.xt_norm.data);
        let corr = self.params.corr.value(&sq_dist, self.theta);
        // Scaled predictor
        let y_ = &f.dot(&self.inner_params.beta) + &corr.dot(&self.inner_params.gamma);
        // Predictor
        Ok((&y_ * &self.yt_norm.std + &self.yt_norm.mean).remove_axis(Axis(1)))
    }

    /// Retrieve optimized hyperparameter theta
    pub fn theta(&self) -> F {
        self.theta
    }

    /// Retrieve the nugget (given or optimized)
    pub fn nugget(&self) -> F {
        self.nugget
    }

    /// Estimated variance
    pub fn variance(&self) -> F {
        self.inner_params.sigma2
    }

    /// Retrieve reduced likelihood value
    pub fn likelihood(&self) -> F {
        self.likelihood
    }

    /// Retrieve input and output dimensions
    pub fn dims(&self) -> (usize, usize) {
        (self.xt_norm.ncols(), self.yt_norm.ncols())
    }

    /// Retrieve number of training points
    pub fn n_obs(&self) -> usize {
        self.xt_norm.data.nrows()
    }

    /// Number of estimated parameters: trend weights, theta, process variance
    /// and the nugget when it was optimized
    pub fn n_params(&self) -> usize {
        let nugget = usize::from(self.params.nugget_tuning.is_optimized());
        self.inner_params.beta.nrows() + 2 + nugget
    }

    /// Parameters used to fit this model
    pub fn fit_params(&self) -> &GpValidParams<F, Mean, Corr> {
        &self.params
    }
}

/// Hyperparameters layout of the optimization vector: optimized parameters only, theta first
struct HyperLayout<F: Float> {
    theta: ParamTuning<F>,
    nugget: ParamTuning<F>,
}

impl<F: Float> HyperLayout<F> {
    fn inits_and_bounds(&self) -> (Array1<f64>, Vec<(f64, f64)>) {
        let mut inits = vec![];
        let mut bounds = vec![];
        for tuning in [&self.theta, &self.nugget] {
            if let ParamTuning::Optimized { init, bounds: (lo, up) } = tuning {
                inits.push(to_f64(*init));
                bounds.push((to_f64(*lo), to_f64(*up)));
            }
        }
        (Array1::from_vec(inits), bounds)
    }

    /// Decode (theta, nugget) from log10 optimized values
    fn decode(&self, x: &[f64]) -> (F, F) {
        let mut values = x.iter().map(|v| F::cast(10f64.powf(*v)));
        let theta = match self.theta {
            ParamTuning::Fixed(v) => v,
            ParamTuning::Optimized { .. } => values.next().unwrap_or(F::nan()),
        };
        let nugget = match self.nugget {
            ParamTuning::Fixed(v) => v,
            ParamTuning::Optimized { .. } => values.next().unwrap_or(F::nan()),
        };
        (theta, nugget)
    }
}

impl<F: Float, Mean: RegressionModel<F>, Corr: CorrelationModel<F>, D: Data<Elem = F>>
    Fit<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>, GpError> for GpValidParams<F, Mean, Corr>
{
    type Object = GaussianProcess<F, Mean, Corr>;

    /// Fit GP parameters using maximum likelihood
    fn fit(
        &self,
        dataset: &DatasetBase<ArrayBase<D, Ix2>, ArrayBase<D, Ix1>>,
    ) -> Result<Self::Object> {
        let x = dataset.records();
        let y = dataset.targets().to_owned().insert_axis(Axis(1));

        if x.nrows() < 2 {
            return Err(GpError::InvalidValueError(format!(
                "At least 2 training points are required, got {}",
                x.nrows()
            )));
        }
        if x.nrows() != y.nrows() {
            return Err(GpError::InvalidValueError(format!(
                "Training inputs ({}) and outputs ({}) sizes differ",
                x.nrows(),
                y.nrows()
            )));
        }

        let xtrain = NormalizedData::new(x);
        let ytrain = NormalizedData::new(&y);

        let x_distances = DistanceMatrix::new(&xtrain.data);
        if x_distances.min_distance() == Some(F::zero()) {
            debug!("Multiple training points share the same input values");
        }
        let fx = self.mean().value(&xtrain.data);

        let layout = HyperLayout {
            theta: self.theta_tuning,
            nugget: self.nugget_tuning,
        };
        let (theta, nugget) = if !self.theta_tuning.is_optimized()
            && !self.nugget_tuning.is_optimized()
        {
            // Easy path no optimization
            (self.theta_tuning.init(), self.nugget_tuning.init())
        } else {
            let objfn = |x: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
                let (theta, nugget) = layout.decode(x);
                // optimizer may return nan values
                if theta.is_nan() || nugget.is_nan() {
                    return f64::INFINITY;
                }
                let rxx = self.corr().value(&x_distances.d2, theta);
                match reduced_likelihood(&fx, &rxx, &x_distances, &ytrain, nugget) {
                    Ok(r) => -to_f64(r.0),
                    Err(_) => f64::INFINITY,
                }
            };

            let (params0, bounds) = layout.inits_and_bounds();
            let (inits, bounds) =
                prepare_multistart(self.n_start(), &params0, &bounds, self.seed());
            debug!("Optimize with multistart params = {inits:?} and bounds = {bounds:?}");
            let now = Instant::now();
            let results: Vec<(f64, Array1<f64>)> = (0..inits.nrows())
                .into_par_iter()
                .map(|i| {
                    optimize_params(
                        objfn,
                        &inits.row(i).to_owned(),
                        &bounds,
                        CobylaParams {
                            maxeval: (10 * inits.ncols())
                                .clamp(GP_COBYLA_MIN_EVAL, self.max_eval()),
                            ..CobylaParams::default()
                        },
                    )
                })
                .collect();
            debug!("elapsed optim = {:?}", now.elapsed().as_millis());
            // first best wins so that the outcome does not depend on thread scheduling
            let best = results
                .into_iter()
                .fold(None, |acc: Option<(f64, Array1<f64>)>, b| match acc {
                    Some(a) if a.0 <= b.0 => Some(a),
                    _ => Some(b),
                })
                .filter(|(fval, _)| fval.is_finite())
                .ok_or_else(|| {
                    GpError::LikelihoodComputationError(
                        "no multistart point gave a finite likelihood".to_string(),
                    )
                })?;
            layout.decode(&best.1.to_vec())
        };

        let rxx = self.corr().value(&x_distances.d2, theta);
        let (lkh, inner_params) = reduced_likelihood(&fx, &rxx, &x_distances, &ytrain, nugget)?;
        Ok(GaussianProcess {
            theta,
            nugget,
            likelihood: lkh,
            inner_params,
            xt_norm: xtrain,
            yt_norm: ytrain,
            params: self.clone(),
        })
    }
}

#[inline]
fn to_f64<F: Float>(v: F) -> f64 {
    num_traits::ToPrimitive::to_f64(&v).unwrap_or(f64::NAN)
}

/// Extreme singular values (min, max)
fn singular_range<F: Float>(a: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<(F, F)> {
    let (_, sv, _) = a.to_owned().svd(false, false)?;
    let range = sv.iter().fold((F::infinity(), F::zero()), |(lo, up), v| {
        let v = num_traits::Float::abs(*v);
        (lo.min(v), up.max(v))
    });
    Ok(range)
}

/// Compute reduced likelihood function
/// fx: mean factors term at x samples,
/// rxx: correlation values for each pair of x samples,
/// x_distances: pairwise squared distances between x samples
/// ytrain: normalized output training values
/// nugget: noise to signal ratio added to the correlation matrix diagonal
fn reduced_likelihood<F: Float>(
    fx: &ArrayBase<impl Data<Elem = F>, Ix2>,
    rxx: &Array1<F>,
    x_distances: &DistanceMatrix<F>,
    ytrain: &NormalizedData<F>,
    nugget: F,
) -> Result<(F, GpInnerParams<F>)> {
    if fx.ncols() > x_distances.n_obs {
        return Err(GpError::LikelihoodComputationError(format!(
            "{} trend terms for {} training points",
            fx.ncols(),
            x_distances.n_obs
        )));
    }
    // Set up R
    let mut r_mx: Array2<F> = Array2::<F>::eye(x_distances.n_obs).mapv(|v| v + v * nugget);
    for (ij, r) in x_distances.d_indices.outer_iter().zip(rxx.iter()) {
        r_mx[[ij[0], ij[1]]] = *r;
        r_mx[[ij[1], ij[0]]] = *r;
    }
    // R cholesky decomposition
    let r_chol = r_mx.cholesky()?;
    // Solve generalized least squared problem
    let ft = r_chol.solve_triangular(fx, UPLO::Lower)?;
    let (ft_qr_q, ft_qr_r) = ft.qr()?.into_decomp();

    // Check whether we have an ill-conditionned problem
    let (sv_min, sv_max) = singular_range(&ft_qr_r)?;
    if sv_min / sv_max < F::cast(1e-10) {
        let (sv_min, sv_max) = singular_range(fx)?;
        if sv_max / sv_min > F::cast(1e15) {
            return Err(GpError::LikelihoodComputationError(
                "F is too ill conditioned. Poor combination \
                of regression model and observations."
                    .to_string(),
            ));
        } else {
            // ft is too ill conditioned, try different theta
            return Err(GpError::LikelihoodComputationError(
                "ft is too ill conditioned, try another theta again".to_string(),
            ));
        }
    }
    let yt = r_chol.solve_triangular(&ytrain.data, UPLO::Lower)?;

    let beta = ft_qr_r.solve_triangular_into(ft_qr_q.t().dot(&yt), UPLO::Upper)?;
    let rho = yt - ft.dot(&beta);
    let rho_sqr = rho.mapv(|v| v * v).sum_axis(Axis(0));

    let gamma = r_chol.t().solve_triangular_into(rho, UPLO::Upper)?;
    // The determinant of R is equal to the squared product of
    // the diagonal elements of its Cholesky decomposition r_chol
    let n_obs: F = F::cast(x_distances.n_obs);

    let logdet = r_chol.diag().mapv(|v: F| v.log10()).sum() * F::cast(2.) / n_obs;

    // Reduced likelihood
    let sigma2 = rho_sqr / n_obs;
    let reduced_likelihood = -n_obs * (sigma2.sum().log10() + logdet);

    Ok((
        reduced_likelihood,
        GpInnerParams {
            sigma2: sigma2[0] * ytrain.std[0] * ytrain.std[0],
            beta,
            gamma,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use linfa::prelude::Dataset;
    use ndarray::{array, Array};
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256Plus;

    fn noisy_sin(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let xt = Array::linspace(0., 6., n).insert_axis(Axis(1));
        let yt = xt
            .column(0)
            .mapv(|v: f64| v.sin() + 0.05 * (rng.gen::<f64>() - 0.5));
        (xt, yt)
    }

    #[test]
    fn test_constant_function() {
        let xt = array![[0.1, 0.5], [0.3, 0.9], [0.7, 0.2], [0.9, 0.8], [0.5, 0.4]];
        let yt = Array::from_elem((5,), 3.1);
        let gp = GaussianProcess::<f64, ConstantMean, SquaredExponentialCorr>::params(
            ConstantMean::default(),
            SquaredExponentialCorr::default(),
        )
        .theta_tuning(ParamTuning::Fixed(0.5))
        .nugget_tuning(ParamTuning::Fixed(1e-6))
        .fit(&Dataset::new(xt, yt))
        .expect("GP fit error");
        let xtest = array![[0.2, 0.2], [0.6, 0.6], [0.95, 0.05]];
        let ytest = gp.predict(&xtest).expect("prediction error");
        assert_abs_diff_eq!(Array::from_elem((3,), 3.1), ytest, epsilon = 1e-6);
    }

    #[test]
    fn test_noisy_fit_smooths() {
        let (xt, yt) = noisy_sin(20, 42);
        let gp = GaussianProcess::<f64, LinearMean, SquaredExponentialCorr>::params(
            LinearMean::default(),
            SquaredExponentialCorr::default(),
        )
        .n_start(4)
        .fit(&Dataset::new(xt.to_owned(), yt.to_owned()))
        .expect("GP fit error");

        assert!(gp.theta() > 0.);
        assert!(gp.nugget() > 0.);
        assert!(gp.variance() > 0.);

        let xtest = array![[1.0], [2.5], [4.2]];
        let ytest = gp.predict(&xtest).expect("prediction error");
        assert_abs_diff_eq!(xtest.column(0).mapv(f64::sin), ytest, epsilon = 0.25);

        // nugget keeps the model from interpolating exactly
        let yfit = gp.predict(&xt).expect("prediction error");
        let rss = (&yt - &yfit).mapv(|v| v * v).sum();
        assert!(rss > 0.);
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (xt, yt) = noisy_sin(15, 3);
        let params = GaussianProcess::<f64, LinearMean, SquaredExponentialCorr>::params(
            LinearMean::default(),
            SquaredExponentialCorr::default(),
        )
        .n_start(3)
        .seed(12);
        let gp1 = params.fit(&Dataset::new(xt.to_owned(), yt.to_owned())).unwrap();
        let gp2 = params.fit(&Dataset::new(xt.to_owned(), yt.to_owned())).unwrap();
        assert_eq!(gp1.theta(), gp2.theta());
        assert_eq!(gp1.nugget(), gp2.nugget());
        assert_eq!(gp1.predict(&xt).unwrap(), gp2.predict(&xt).unwrap());
    }

    #[test]
    fn test_n_params() {
        let (xt, yt) = noisy_sin(10, 0);
        let xt = ndarray::concatenate![Axis(1), xt, xt.mapv(|v| v * v)];
        let linear = GaussianProcess::<f64, LinearMean, SquaredExponentialCorr>::params(
            LinearMean::default(),
            SquaredExponentialCorr::default(),
        )
        .fit(&Dataset::new(xt.to_owned(), yt.to_owned()))
        .unwrap();
        // beta (1 + 2) + theta + sigma2 + nugget
        assert_eq!(linear.n_params(), 6);

        let constant = GaussianProcess::<f64, ConstantMean, SquaredExponentialCorr>::params(
            ConstantMean::default(),
            SquaredExponentialCorr::default(),
        )
        .nugget_tuning(ParamTuning::Fixed(1e-3))
        .fit(&Dataset::new(xt, yt))
        .unwrap();
        assert_eq!(constant.n_params(), 3);
        assert_eq!(constant.nugget(), 1e-3);
    }

    #[test]
    fn test_predict_bad_dims() {
        let (xt, yt) = noisy_sin(8, 1);
        let gp = GaussianProcess::<f64, ConstantMean, SquaredExponentialCorr>::params(
            ConstantMean::default(),
            SquaredExponentialCorr::default(),
        )
        .fit(&Dataset::new(xt, yt))
        .unwrap();
        assert!(gp.predict(&array![[1., 2.]]).is_err());
        assert_eq!(gp.dims(), (1, 1));
        assert_eq!(gp.n_obs(), 8);
    }

    #[test]
    fn test_too_few_points() {
        let res = GaussianProcess::<f64, ConstantMean, SquaredExponentialCorr>::params(
            ConstantMean::default(),
            SquaredExponentialCorr::default(),
        )
        .fit(&Dataset::new(array![[1.]], array![2.]));
        assert!(matches!(res, Err(GpError::InvalidValueError(_))));
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_save_load() {
        let (xt, yt) = noisy_sin(12, 5);
        let gp = GaussianProcess::<f64, LinearMean, SquaredExponentialCorr>::params(
            LinearMean::default(),
            SquaredExponentialCorr::default(),
        )
        .fit(&Dataset::new(xt.to_owned(), yt))
        .unwrap();
        let json = serde_json::to_string(&gp).unwrap();
        let loaded: GaussianProcess<f64, LinearMean, SquaredExponentialCorr> =
            serde_json::from_str(&json).unwrap();
        assert_abs_diff_eq!(
            gp.predict(&xt).unwrap(),
            loaded.predict(&xt).unwrap(),
            epsilon = 1e-10
        );
        assert_eq!(gp.n_params(), loaded.n_params());
    }
}
