//! A module for the correlation model used to model the error term of the GP model.
//!
//! Only the isotropic squared exponential kernel is implemented: the correlation
//! between two points depends on their euclidean distance only, scaled by a single
//! `theta` hyperparameter shared by every input component (`theta` = 1 / length scale).

use linfa::Float;
use ndarray::{Array, ArrayBase, Data, Dimension, Ix1};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for using an isotropic correlation model in GP regression
pub trait CorrelationModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync {
    /// Compute correlation values r(x, x') given squared euclidean distances
    /// `sq_dist` = ||x - x'||^2 and the `theta` hyperparameter.
    /// Output has the shape of `sq_dist`.
    fn value<D: Dimension>(
        &self,
        sq_dist: &ArrayBase<impl Data<Elem = F>, D>,
        theta: F,
    ) -> Array<F, D>;

    /// Covariance k(x, x') of two single points for a unit process variance.
    fn kernel(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix1>,
        xprime: &ArrayBase<impl Data<Elem = F>, Ix1>,
        theta: F,
    ) -> F {
        let sq = (x - xprime).mapv(|v| v * v).sum();
        self.value(&ndarray::arr0(sq), theta).into_scalar()
    }
}

/// Isotropic squared exponential correlation model
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct SquaredExponentialCorr();

impl From<SquaredExponentialCorr> for String {
    fn from(_item: SquaredExponentialCorr) -> String {
        "SquaredExponential".to_string()
    }
}

impl TryFrom<String> for SquaredExponentialCorr {
    type Error = &'static str;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "SquaredExponential" {
            Ok(Self::default())
        } else {
            Err("Bad string value for SquaredExponentialCorr, should be \'SquaredExponential\'")
        }
    }
}

impl<F: Float> CorrelationModel<F> for SquaredExponentialCorr {
    /// exp( - theta^2 * ||x - x'||^2 / 2 )
    fn value<D: Dimension>(
        &self,
        sq_dist: &ArrayBase<impl Data<Elem = F>, D>,
        theta: F,
    ) -> Array<F, D> {
        let factor = F::cast(-0.5) * theta * theta;
        sq_dist.mapv(|v| F::exp(factor * v))
    }
}

impl fmt::Display for SquaredExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_squared_exponential() {
        let sq_dist = array![0., 1., 2.];
        let r = SquaredExponentialCorr::default().value(&sq_dist, 1.);
        assert_abs_diff_eq!(
            r,
            array![1., f64::exp(-0.5), f64::exp(-1.)],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_kernel_is_isotropic() {
        let corr = SquaredExponentialCorr::default();
        let origin = Array1::<f64>::zeros(2);
        // same euclidean distance, different directions
        let k1 = corr.kernel(&origin, &array![3., 4.], 0.3);
        let k2 = corr.kernel(&origin, &array![0., -5.], 0.3);
        let k3 = corr.kernel(&array![1., 1.], &array![-2., 5.], 0.3);
        assert_abs_diff_eq!(k1, k2, epsilon = 1e-14);
        assert_abs_diff_eq!(k1, k3, epsilon = 1e-14);
        assert_abs_diff_eq!(k1, f64::exp(-0.5 * 0.09 * 25.), epsilon = 1e-14);
    }

    #[test]
    fn test_kernel_decreases_with_distance() {
        let corr = SquaredExponentialCorr::default();
        let x = array![0.5];
        let near = corr.kernel(&x, &array![0.6], 2.);
        let far = corr.kernel(&x, &array![1.5], 2.);
        assert_abs_diff_eq!(corr.kernel(&x, &x, 2.), 1., epsilon = 1e-14);
        assert!(near > far);
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_save_load() {
        let data = r#""SquaredExponential""#;
        let v: SquaredExponentialCorr = serde_json::from_str(data).unwrap();
        assert_eq!(v, SquaredExponentialCorr());
        let s = serde_json::to_string(&v).unwrap();
        assert_eq!(s, data);
    }
}
