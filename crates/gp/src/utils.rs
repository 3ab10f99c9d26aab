use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A structure to store (n, xdim) matrix data and its mean and standard deviation vectors.
#[derive(Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub(crate) struct NormalizedData<F: Float> {
    /// normalized data
    pub data: Array2<F>,
    /// mean vector computed from data
    pub mean: Array1<F>,
    /// standard deviation vector computed from data
    pub std: Array1<F>,
}

impl<F: Float> Clone for NormalizedData<F> {
    fn clone(&self) -> NormalizedData<F> {
        NormalizedData {
            data: self.data.to_owned(),
            mean: self.mean.to_owned(),
            std: self.std.to_owned(),
        }
    }
}

impl<F: Float> NormalizedData<F> {
    /// Constructor
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> NormalizedData<F> {
        let (data, mean, std) = normalize(x);
        NormalizedData { data, mean, std }
    }

    /// Dimension of data points
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Apply the stored normalization to new points
    pub fn apply(&self, x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Array2<F> {
        (x - &self.mean) / &self.std
    }
}

/// Center and scale columns (sample standard deviation).
/// Constant columns are only centered.
pub fn normalize<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> (Array2<F>, Array1<F>, Array1<F>) {
    let x_mean = x
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(x.ncols()));
    let mut x_std = x.std_axis(Axis(0), F::one());
    x_std.mapv_inplace(|v| if v == F::zero() || v.is_nan() { F::one() } else { v });
    let xnorm = (x - &x_mean) / &x_std;

    (xnorm, x_mean, x_std)
}

/// Squared euclidean distances between every distinct pair of training points,
/// used to build the correlation matrix.
#[derive(Debug)]
pub struct DistanceMatrix<F: Float> {
    /// Squared distances as (n_obs * (n_obs-1))/2 vector
    pub d2: Array1<F>,
    /// Row indices (i, j), i < j, of each distance in the original data array
    pub d_indices: Array2<usize>,
    /// Number of observations
    pub n_obs: usize,
}

impl<F: Float> DistanceMatrix<F> {
    /// Compute distances given points given as an array (n_obs, nx)
    pub fn new(x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> DistanceMatrix<F> {
        let n_obs = x.nrows();
        let n_pairs = n_obs * n_obs.saturating_sub(1) / 2;
        let mut d2 = Array1::<F>::zeros(n_pairs);
        let mut d_indices = Array2::<usize>::zeros((n_pairs, 2));
        let mut idx = 0;
        for i in 0..n_obs {
            for j in (i + 1)..n_obs {
                let diff = &x.row(i) - &x.row(j);
                d2[idx] = diff.mapv(|v| v * v).sum();
                d_indices[[idx, 0]] = i;
                d_indices[[idx, 1]] = j;
                idx += 1;
            }
        }
        DistanceMatrix {
            d2,
            d_indices,
            n_obs,
        }
    }

    /// Smallest distance between two distinct points (zero when rows are duplicated)
    pub fn min_distance(&self) -> Option<F> {
        self.d2
            .iter()
            .copied()
            .fold(None, |acc: Option<F>, v| match acc {
                Some(m) if m <= v => Some(m),
                _ => Some(v),
            })
    }
}

/// Squared euclidean distances between each row of x and each row of y
/// resulting in a 2d array of shape (nrows(x), nrows(y));
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_sq_distances<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    assert!(x.ncols() == y.ncols());

    let mut result = Array2::zeros((x.nrows(), y.nrows()));
    for (i, x_row) in x.rows().into_iter().enumerate() {
        for (j, y_row) in y.rows().into_iter().enumerate() {
            result[[i, j]] = x_row
                .iter()
                .zip(y_row.iter())
                .fold(F::zero(), |acc, (a, b)| acc + (*a - *b) * (*a - *b));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pairwise_sq_distances() {
        let x = array![[0., 0.], [1., 1.]];
        let y = array![[0., 0.], [3., 4.], [1., 0.]];
        assert_abs_diff_eq!(
            &array![[0., 25., 1.], [2., 13., 1.]],
            &pairwise_sq_distances(&x, &y),
            epsilon = 1e-12
        )
    }

    #[test]
    fn test_normalized_matrix() {
        let x = array![[1., 2.], [3., 4.]];
        let xnorm = NormalizedData::new(&x);
        assert_eq!(xnorm.ncols(), 2);
        assert_eq!(array![2., 3.], xnorm.mean);
        assert_eq!(array![f64::sqrt(2.), f64::sqrt(2.)], xnorm.std);
        assert_abs_diff_eq!(xnorm.apply(&array![[2., 3.]]), array![[0., 0.]]);
    }

    #[test]
    fn test_normalize_constant_column() {
        let x = array![[1., 5.], [3., 5.], [5., 5.]];
        let (xnorm, _, std) = normalize(&x);
        assert_eq!(std[1], 1.);
        assert_abs_diff_eq!(xnorm.column(1).to_owned(), array![0., 0., 0.]);
    }

    #[test]
    fn test_distance_matrix() {
        let xt = array![[0.5], [1.2], [2.0], [4.0]];
        let dm = DistanceMatrix::new(&xt);
        assert_eq!(dm.n_obs, 4);
        assert_abs_diff_eq!(
            dm.d2,
            array![0.49, 2.25, 12.25, 0.64, 7.84, 4.],
            epsilon = 1e-12
        );
        assert_eq!(
            dm.d_indices,
            array![[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]]
        );
        assert_abs_diff_eq!(dm.min_distance().unwrap(), 0.49, epsilon = 1e-12);
    }
}
