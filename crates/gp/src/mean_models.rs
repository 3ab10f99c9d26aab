//! A module for regression models to model the mean term of the GP model.
//!
//! The following models are implemented:
//! * constant (ordinary kriging),
//! * linear (universal kriging with an affine trend)

use linfa::Float;
use ndarray::{concatenate, Array2, ArrayBase, Axis, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

/// A trait for mean models used in GP regression
pub trait RegressionModel<F: Float>: Clone + Copy + Default + fmt::Display + Sync {
    /// Compute regression coefficients defining the mean behaviour of the GP model
    /// for the given `x` data points specified as (n, nx) matrix.
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F>;
}

/// A constant function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct ConstantMean();

impl<F: Float> RegressionModel<F> for ConstantMean {
    /// regr(x) = [1, ..., 1].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        Array2::<F>::ones((x.nrows(), 1))
    }
}

/// An affine function as mean of the GP
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(into = "String"),
    serde(try_from = "String")
)]
pub struct LinearMean();

impl<F: Float> RegressionModel<F> for LinearMean {
    /// regr(x) = [ 1, x_1, ..., x_n ].T
    fn value(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        concatenate![Axis(1), Array2::ones((x.nrows(), 1)), x.to_owned()]
    }
}

macro_rules! declare_mean_util_impls {
    ($mean:ident, $name:literal) => {
        impl fmt::Display for $mean {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, $name)
            }
        }

        impl From<$mean> for String {
            fn from(_item: $mean) -> Self {
                $name.to_string()
            }
        }

        impl TryFrom<String> for $mean {
            type Error = &'static str;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                if s == $name {
                    Ok(Self::default())
                } else {
                    Err(concat!("Bad string value, should be '", $name, "'"))
                }
            }
        }
    };
}

declare_mean_util_impls!(ConstantMean, "ConstantMean");
declare_mean_util_impls!(LinearMean, "LinearMean");

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_constant() {
        let a = array![[1., 2.], [3., 4.], [5., 6.]];
        let actual = ConstantMean::default().value(&a);
        assert_abs_diff_eq!(array![[1.], [1.], [1.]], actual);
    }

    #[test]
    fn test_linear() {
        let a = array![[1., 2., 3.], [3., 4., 5.]];
        let actual = LinearMean::default().value(&a);
        let expected = array![[1., 1., 2., 3.], [1., 3., 4., 5.]];
        assert_abs_diff_eq!(expected, actual);
    }

    #[test]
    fn test_utils() {
        assert_eq!("ConstantMean", ConstantMean().to_string());
        assert_eq!("LinearMean", LinearMean().to_string());
        assert!(LinearMean::try_from("ConstantMean".to_string()).is_err());
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_save_load() {
        let data = r#""LinearMean""#;
        let v: LinearMean = serde_json::from_str(data).unwrap();
        assert_eq!(v, LinearMean());
    }
}
