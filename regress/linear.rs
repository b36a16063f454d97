//! Ordinary least squares with an intercept.
//!
//! GWAS designs routinely have more SNPs than samples, so the solve goes through an
//! SVD-based least-squares routine that returns the minimum-norm solution when the
//! centred design is rank deficient.

use crate::model::{EstimationError, FittedRegressor, LinearPredictor, Regressor};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::LeastSquaresSvd;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearRegression {
    pub fit_intercept: bool,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self {
            fit_intercept: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OlsFit {
    predictor: LinearPredictor,
    /// Numerical rank of the (centred) design.
    pub rank: usize,
}

impl FittedRegressor for OlsFit {
    fn predictor(&self) -> &LinearPredictor {
        &self.predictor
    }
}

impl Regressor for LinearRegression {
    type Fitted = OlsFit;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<OlsFit, EstimationError> {
        EstimationError::check_sample_count(x, y)?;
        let n_f = x.nrows() as f64;

        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = x
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(x.ncols()));
            (x_mean, y.sum() / n_f)
        } else {
            (Array1::zeros(x.ncols()), 0.0)
        };

        if x.ncols() == 0 {
            return Ok(OlsFit {
                predictor: LinearPredictor {
                    intercept: y_mean,
                    coefficients: Array1::zeros(0),
                },
                rank: 0,
            });
        }

        let x_centred = &x - &x_mean;
        let y_centred = &y - y_mean;
        let solution = x_centred
            .least_squares(&y_centred)
            .map_err(EstimationError::LinearSystemSolveFailed)?;

        let coefficients = solution.solution;
        let rank = usize::try_from(solution.rank).unwrap_or(0);
        if rank < x.ncols() {
            log::debug!(
                "Least-squares design is rank deficient (rank {} < {} features); returning the minimum-norm solution.",
                rank,
                x.ncols()
            );
        }
        let intercept = y_mean - x_mean.dot(&coefficients);

        Ok(OlsFit {
            predictor: LinearPredictor {
                intercept,
                coefficients,
            },
            rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn recovers_exact_coefficients_and_intercept() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 2.0], [5.0, 1.0]];
        let y = x.dot(&array![2.0, -3.0]) + 0.5;
        let fit = LinearRegression::default().fit(x.view(), y.view()).unwrap();
        assert_abs_diff_eq!(fit.coefficients()[0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.coefficients()[1], -3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.intercept(), 0.5, epsilon = 1e-9);
        assert_eq!(fit.rank, 2);
        assert_abs_diff_eq!(fit.score(x.view(), y.view()).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn underdetermined_design_interpolates_training_data() {
        // More SNPs than samples.
        let x = array![[0.0, 1.0, 2.0, 1.0], [1.0, 1.0, 0.0, 2.0], [2.0, 0.0, 1.0, 0.0]];
        let y = array![1.0, -1.0, 0.5];
        let fit = LinearRegression::default().fit(x.view(), y.view()).unwrap();
        let predictions = fit.predict(x.view()).unwrap();
        for (p, t) in predictions.iter().zip(y.iter()) {
            assert_abs_diff_eq!(p, t, epsilon = 1e-8);
        }
        assert!(fit.rank <= 2);
    }

    #[test]
    fn without_intercept_passes_through_origin() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![2.0, 4.0, 6.0];
        let fit = LinearRegression {
            fit_intercept: false,
        }
        .fit(x.view(), y.view())
        .unwrap();
        assert_abs_diff_eq!(fit.coefficients()[0], 2.0, epsilon = 1e-10);
        assert_eq!(fit.intercept(), 0.0);
    }
}
