use ndarray::{Array1, Array2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Build the multistart initial points of the likelihood optimization.
///
/// Optimization is done in log10 space: returned starting points (n_start, dim)
/// and bounds are log10 of the given values. First row is the user defined
/// initial guess, others are drawn uniformly within bounds from a `seed`ed generator
/// so that a fit is reproducible.
pub(crate) fn prepare_multistart(
    n_start: usize,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    seed: u64,
) -> (Array2<f64>, Vec<(f64, f64)>) {
    let bounds: Vec<(f64, f64)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let n_start = n_start.max(1);
    let mut params0 = Array2::zeros((n_start, param0.len()));
    params0.row_mut(0).assign(&param0.mapv(f64::log10));

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    for mut row in params0.rows_mut().into_iter().skip(1) {
        for (v, (lo, up)) in row.iter_mut().zip(bounds.iter()) {
            *v = rng.gen_range(*lo..*up);
        }
    }
    (params0, bounds)
}

/// Optimize gp hyper parameters given an initial guess and bounds with cobyla
///
/// Returns the best objective value (infinity on failure) and the corresponding point.
pub(crate) fn optimize_params<ObjF>(
    objfn: ObjF,
    param0: &Array1<f64>,
    bounds: &[(f64, f64)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
{
    use cobyla::{minimize, Func, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.to_vec();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, Array1::from_vec(x_opt))
        }
        Err((status, x_opt, _)) => {
            log::debug!("Cobyla optimizer failed in GP likelihood optimization status={status:?}");
            (f64::INFINITY, Array1::from_vec(x_opt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_multistart_is_seeded_and_bounded() {
        let bounds = [(1e-2, 1e1), (1e-6, 1e1)];
        let (p1, b) = prepare_multistart(5, &array![0.1, 0.01], &bounds, 7);
        let (p2, _) = prepare_multistart(5, &array![0.1, 0.01], &bounds, 7);
        assert_eq!(p1, p2);
        assert_eq!(p1.dim(), (5, 2));
        assert_abs_diff_eq!(p1.row(0).to_owned(), array![-1., -2.], epsilon = 1e-12);
        for row in p1.rows() {
            for (v, (lo, up)) in row.iter().zip(b.iter()) {
                assert!(*v >= *lo && *v <= *up);
            }
        }
    }

    #[test]
    fn test_optimize_quadratic() {
        let objfn = |x: &[f64], _g: Option<&mut [f64]>, _u: &mut ()| -> f64 {
            (x[0] - 0.3).powi(2) + (x[1] + 0.2).powi(2)
        };
        let (fmin, xopt) = optimize_params(
            objfn,
            &array![0., 0.],
            &[(-1., 1.), (-1., 1.)],
            CobylaParams {
                maxeval: 500,
                ftol_rel: 1e-10,
                ..CobylaParams::default()
            },
        );
        assert!(fmin < 1e-6);
        assert_abs_diff_eq!(xopt, array![0.3, -0.2], epsilon = 1e-2);
    }
}
