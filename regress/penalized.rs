use crate::model::{EstimationError, FittedRegressor, LinearPredictor, Regressor};
use crate::solver::{
    DenseDesign, Design, ElasticNetPenalty, SolverOptions, coordinate_descent,
};
use ndarray::{ArrayView1, ArrayView2};

/// L1-penalized least squares, `(1/2N) ||y - Xw - c||^2 + alpha ||w||_1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lasso {
    pub alpha: f64,
    pub fit_intercept: bool,
    pub solver: SolverOptions,
}

impl Lasso {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            fit_intercept: true,
            solver: SolverOptions::default(),
        }
    }

    pub fn with_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    fn as_elastic_net(&self) -> ElasticNet {
        ElasticNet {
            alpha: self.alpha,
            l1_ratio: 1.0,
            fit_intercept: self.fit_intercept,
            solver: self.solver,
        }
    }

    /// Fits on any column-accessible design, dense or not.
    pub fn fit_design<D: Design>(
        &self,
        design: &D,
        y: ArrayView1<f64>,
    ) -> Result<PenalizedFit, EstimationError> {
        self.as_elastic_net().fit_design(design, y)
    }
}

/// Combined L1/L2 penalty, weighted by `alpha` and mixed by `l1_ratio`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElasticNet {
    pub alpha: f64,
    pub l1_ratio: f64,
    pub fit_intercept: bool,
    pub solver: SolverOptions,
}

impl ElasticNet {
    pub fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self {
            alpha,
            l1_ratio,
            fit_intercept: true,
            solver: SolverOptions::default(),
        }
    }

    pub fn with_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_solver(mut self, solver: SolverOptions) -> Self {
        self.solver = solver;
        self
    }

    fn validate(&self) -> Result<(), EstimationError> {
        EstimationError::check_non_negative("alpha", self.alpha)?;
        if !(0.0..=1.0).contains(&self.l1_ratio) {
            return Err(EstimationError::InvalidParameter {
                name: "l1_ratio",
                value: self.l1_ratio,
                reason: "must lie in [0, 1]",
            });
        }
        Ok(())
    }

    pub fn fit_design<D: Design>(
        &self,
        design: &D,
        y: ArrayView1<f64>,
    ) -> Result<PenalizedFit, EstimationError> {
        self.validate()?;
        let solution = coordinate_descent(
            design,
            y,
            ElasticNetPenalty {
                alpha: self.alpha,
                l1_ratio: self.l1_ratio,
            },
            self.fit_intercept,
            &self.solver,
        )?;
        log::debug!(
            "Elastic net (alpha={:.3e}, l1_ratio={:.2}) finished after {} passes; converged: {}.",
            self.alpha,
            self.l1_ratio,
            solution.iterations,
            solution.converged
        );
        Ok(PenalizedFit {
            predictor: LinearPredictor {
                intercept: solution.intercept,
                coefficients: solution.coefficients,
            },
            iterations: solution.iterations,
            converged: solution.converged,
            duality_gap: solution.duality_gap,
        })
    }
}

/// A fitted Lasso or Elastic Net.
#[derive(Debug, Clone)]
pub struct PenalizedFit {
    predictor: LinearPredictor,
    pub iterations: usize,
    pub converged: bool,
    pub duality_gap: f64,
}

impl FittedRegressor for PenalizedFit {
    fn predictor(&self) -> &LinearPredictor {
        &self.predictor
    }
}

impl Regressor for Lasso {
    type Fitted = PenalizedFit;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<PenalizedFit, EstimationError> {
        EstimationError::check_sample_count(x, y)?;
        self.fit_design(&DenseDesign(x), y)
    }
}

impl Regressor for ElasticNet {
    type Fitted = PenalizedFit;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<PenalizedFit, EstimationError> {
        EstimationError::check_sample_count(x, y)?;
        self.fit_design(&DenseDesign(x), y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::LinearRegression;
    use crate::metrics::count_nonzero;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    /// Ten features, only the first three carry signal.
    fn sparse_problem() -> (Array2<f64>, Array1<f64>) {
        let mut rng = StdRng::seed_from_u64(0x1A55_0);
        let x = Array2::from_shape_fn((60, 10), |_| rng.sample::<f64, _>(StandardNormal));
        let y = Array1::from_shape_fn(60, |i| {
            2.0 * x[[i, 0]] - 1.5 * x[[i, 1]] + 1.0 * x[[i, 2]]
                + 0.05 * rng.sample::<f64, _>(StandardNormal)
        });
        (x, y)
    }

    #[test]
    fn lasso_selects_the_informative_features() {
        let (x, y) = sparse_problem();
        let fit = Lasso::new(0.05).fit(x.view(), y.view()).unwrap();
        assert!(fit.converged);
        let coefficients = fit.coefficients();
        assert!(coefficients[0] > 1.0);
        assert!(coefficients[1] < -0.5);
        assert!(coefficients[2] > 0.3);
        assert!(count_nonzero(coefficients) < 10);
    }

    #[test]
    fn zero_alpha_lasso_agrees_with_ols() {
        let (x, y) = sparse_problem();
        let strict = SolverOptions {
            tol: 1e-12,
            max_iter: 50_000,
        };
        let lasso = Lasso::new(0.0).with_solver(strict).fit(x.view(), y.view()).unwrap();
        let ols = LinearRegression::default().fit(x.view(), y.view()).unwrap();
        for (a, b) in lasso.coefficients().iter().zip(ols.coefficients().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
        assert_abs_diff_eq!(lasso.intercept(), ols.intercept(), epsilon = 1e-4);
    }

    #[test]
    fn elastic_net_with_unit_ratio_is_lasso() {
        let (x, y) = sparse_problem();
        let lasso = Lasso::new(0.1).fit(x.view(), y.view()).unwrap();
        let enet = ElasticNet::new(0.1, 1.0).fit(x.view(), y.view()).unwrap();
        assert_eq!(lasso.coefficients(), enet.coefficients());
        assert_eq!(lasso.intercept(), enet.intercept());
    }

    #[test]
    fn ridge_part_shrinks_but_keeps_features() {
        let (x, y) = sparse_problem();
        let lasso = Lasso::new(0.2).fit(x.view(), y.view()).unwrap();
        let enet = ElasticNet::new(0.2, 0.1).fit(x.view(), y.view()).unwrap();
        assert!(count_nonzero(enet.coefficients()) >= count_nonzero(lasso.coefficients()));
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let (x, y) = sparse_problem();
        assert!(matches!(
            Lasso::new(-0.1).fit(x.view(), y.view()),
            Err(EstimationError::InvalidParameter { name: "alpha", .. })
        ));
        assert!(matches!(
            ElasticNet::new(0.1, 1.5).fit(x.view(), y.view()),
            Err(EstimationError::InvalidParameter { name: "l1_ratio", .. })
        ));
    }

    #[test]
    fn score_is_high_on_training_data() {
        let (x, y) = sparse_problem();
        let fit = ElasticNet::new(0.01, 0.5).fit(x.view(), y.view()).unwrap();
        assert!(fit.score(x.view(), y.view()).unwrap() > 0.95);
    }
}
