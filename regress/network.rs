//! # Network-Constrained Lasso
//!
//! Solves
//!
//! ```text
//! ||y - X beta||^2 + lambda2 * beta^T L beta + lambda1 * ||beta||_1
//! ```
//!
//! with `L = D^T D` for the incidence matrix `D`, by reduction to an ordinary Lasso:
//!
//! ```text
//! X* = [X; sqrt(lambda2) D] / sqrt(1 + lambda2),   y* = [y; 0],   alpha = lambda1 / sqrt(1 + lambda2)
//! ```
//!
//! The zero targets on the incidence rows turn the graph penalty into extra squared
//! residuals. The stacked design has `n_samples + n_edges` rows; it is only ever accessed
//! column by column through [`AugmentedDesign`], so the sparse block is never densified.

use crate::incidence::IncidenceMatrix;
use crate::model::{EstimationError, FittedRegressor, LinearPredictor, Regressor};
use crate::penalized::{Lasso, PenalizedFit};
use crate::solver::{Design, SolverOptions};
use ndarray::{Array1, ArrayView1, ArrayView2, ArrayViewMut1, s};

/// The network-constrained Lasso estimator.
#[derive(Debug, Clone, Copy)]
pub struct NetworkLasso<'a> {
    incidence: &'a IncidenceMatrix,
    pub lambda1: f64,
    pub lambda2: f64,
    pub fit_intercept: bool,
    pub solver: SolverOptions,
}

impl<'a> NetworkLasso<'a> {
    pub fn new(incidence: &'a IncidenceMatrix, lambda1: f64, lambda2: f64) -> Self {
        Self {
            incidence,
            lambda1,
            lambda2,
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

    /// `sqrt(1 + lambda2)`, the factor relating augmented and original coefficients.
    pub fn scale(&self) -> f64 {
        (1.0 + self.lambda2).sqrt()
    }

    /// The penalty handed to the inner Lasso.
    pub fn effective_alpha(&self) -> f64 {
        self.lambda1 / self.scale()
    }
}

/// `[X; sqrt(lambda2) D] / sqrt(1 + lambda2)`, evaluated lazily.
pub struct AugmentedDesign<'x, 'g> {
    x: ArrayView2<'x, f64>,
    incidence: &'g IncidenceMatrix,
    data_scale: f64,
    graph_scale: f64,
}

impl<'x, 'g> AugmentedDesign<'x, 'g> {
    pub fn new(x: ArrayView2<'x, f64>, incidence: &'g IncidenceMatrix, lambda2: f64) -> Self {
        let scale = (1.0 + lambda2).sqrt();
        Self {
            x,
            incidence,
            data_scale: 1.0 / scale,
            graph_scale: lambda2.sqrt() / scale,
        }
    }

    fn n_samples(&self) -> usize {
        self.x.nrows()
    }
}

impl Design for AugmentedDesign<'_, '_> {
    fn n_rows(&self) -> usize {
        self.n_samples() + self.incidence.n_edges()
    }

    fn n_cols(&self) -> usize {
        self.x.ncols()
    }

    fn column_dot(&self, j: usize, v: ArrayView1<f64>) -> f64 {
        let n = self.n_samples();
        let dense = self.x.column(j).dot(&v.slice(s![..n]));
        let mut sparse = 0.0;
        self.incidence
            .for_each_in_column(j, |edge, value| sparse += value * v[n + edge]);
        self.data_scale * dense + self.graph_scale * sparse
    }

    fn column_axpy(&self, j: usize, a: f64, mut out: ArrayViewMut1<f64>) {
        let n = self.n_samples();
        out.slice_mut(s![..n])
            .scaled_add(a * self.data_scale, &self.x.column(j));
        let graph_factor = a * self.graph_scale;
        self.incidence
            .for_each_in_column(j, |edge, value| out[n + edge] += graph_factor * value);
    }

    fn column_sum(&self, j: usize) -> f64 {
        let mut sparse = 0.0;
        self.incidence
            .for_each_in_column(j, |_, value| sparse += value);
        self.data_scale * self.x.column(j).sum() + self.graph_scale * sparse
    }

    fn column_sq_norm(&self, j: usize) -> f64 {
        let column = self.x.column(j);
        let mut sparse = 0.0;
        self.incidence
            .for_each_in_column(j, |_, value| sparse += value * value);
        self.data_scale.powi(2) * column.dot(&column) + self.graph_scale.powi(2) * sparse
    }
}

/// A fitted network-constrained Lasso.
///
/// Prediction and scoring go through the inner Lasso fitted on the augmented problem;
/// [`FittedRegressor::coefficients`] returns the inner coefficients divided by
/// `sqrt(1 + lambda2)`.
#[derive(Debug, Clone)]
pub struct NetworkLassoFit {
    inner: PenalizedFit,
    coefficients: Array1<f64>,
    pub lambda1: f64,
    pub lambda2: f64,
}

impl NetworkLassoFit {
    pub fn inner(&self) -> &PenalizedFit {
        &self.inner
    }
}

impl FittedRegressor for NetworkLassoFit {
    fn predictor(&self) -> &LinearPredictor {
        self.inner.predictor()
    }

    fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }
}

impl Regressor for NetworkLasso<'_> {
    type Fitted = NetworkLassoFit;

    fn fit(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<NetworkLassoFit, EstimationError> {
        EstimationError::check_non_negative("lambda1", self.lambda1)?;
        EstimationError::check_non_negative("lambda2", self.lambda2)?;
        EstimationError::check_sample_count(x, y)?;
        if self.incidence.n_features() != x.ncols() {
            return Err(EstimationError::DimensionMismatch {
                context: "network-constrained Lasso incidence matrix",
                expected: x.ncols(),
                found: self.incidence.n_features(),
            });
        }

        let n = x.nrows();
        let m = self.incidence.n_edges();
        log::debug!(
            "Network-constrained Lasso: lambda1={:.3e}, lambda2={:.3e}, augmented design {} x {}.",
            self.lambda1,
            self.lambda2,
            n + m,
            x.ncols()
        );

        let design = AugmentedDesign::new(x, self.incidence, self.lambda2);
        let mut y_augmented = Array1::zeros(n + m);
        y_augmented.slice_mut(s![..n]).assign(&y);

        let inner = Lasso::new(self.effective_alpha())
            .with_intercept(self.fit_intercept)
            .with_solver(self.solver)
            .fit_design(&design, y_augmented.view())?;
        let coefficients = inner.coefficients().to_owned() / self.scale();

        Ok(NetworkLassoFit {
            inner,
            coefficients,
            lambda1: self.lambda1,
            lambda2: self.lambda2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incidence::{DegreeConvention, FeatureGraph};
    use crate::solver::DenseDesign;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    fn materialize(design: &AugmentedDesign, x: ArrayView2<f64>, incidence: &IncidenceMatrix, lambda2: f64) -> Array2<f64> {
        let n = x.nrows();
        let scale = (1.0 + lambda2).sqrt();
        let mut dense = Array2::zeros((design.n_rows(), design.n_cols()));
        dense.slice_mut(s![..n, ..]).assign(&(&x / scale));
        for (edge, feature, value) in incidence.triplets() {
            dense[[n + edge, feature]] = lambda2.sqrt() * value / scale;
        }
        dense
    }

    #[test]
    fn lazy_design_matches_materialized_stack() {
        let x = array![[0.0, 1.0, 2.0], [1.0, 0.0, 2.0], [2.0, 1.0, 0.0], [1.0, 1.0, 1.0]];
        let graph = FeatureGraph::from_parts(3, vec![0, 1], vec![1, 2], vec![1.0, 3.0]).unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        let lambda2 = 2.5;
        let design = AugmentedDesign::new(x.view(), &incidence, lambda2);
        let dense = materialize(&design, x.view(), &incidence, lambda2);
        let reference = DenseDesign(dense.view());
        let v = Array1::from_shape_fn(design.n_rows(), |i| (i as f64) - 1.5);

        for j in 0..3 {
            assert_abs_diff_eq!(design.column_dot(j, v.view()), reference.column_dot(j, v.view()), epsilon = 1e-12);
            assert_abs_diff_eq!(design.column_sum(j), reference.column_sum(j), epsilon = 1e-12);
            assert_abs_diff_eq!(design.column_sq_norm(j), reference.column_sq_norm(j), epsilon = 1e-12);

            let mut lazy = v.clone();
            let mut eager = v.clone();
            design.column_axpy(j, 0.7, lazy.view_mut());
            reference.column_axpy(j, 0.7, eager.view_mut());
            for (a, b) in lazy.iter().zip(eager.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
    }

    // Genotype blocks are loaded and dropped while one estimator keeps borrowing the graph.
    fn fit_block(model: &NetworkLasso<'_>, offset: usize) -> NetworkLassoFit {
        let x = Array2::from_shape_fn((12, 3), |(i, j)| ((i * 5 + j * 3 + offset) % 7) as f64);
        let y = x.column(0).to_owned() - x.column(2).to_owned() * 0.5;
        model.fit(x.view(), y.view()).unwrap()
    }

    #[test]
    fn estimator_outlives_the_data_it_fits() {
        let graph = FeatureGraph::from_parts(3, vec![0, 1], vec![1, 2], vec![1.0, 1.0]).unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        let model = NetworkLasso::new(&incidence, 0.01, 0.5);
        let first = fit_block(&model, 0);
        let second = fit_block(&model, 2);
        assert_eq!(first.coefficients().len(), 3);
        assert_eq!(second.coefficients().len(), 3);
        assert!(first.coefficients().iter().chain(second.coefficients().iter()).all(|c| c.is_finite()));
    }

    #[test]
    fn effective_alpha_and_scale() {
        let incidence = IncidenceMatrix::empty(2);
        let model = NetworkLasso::new(&incidence, 0.3, 3.0);
        assert_abs_diff_eq!(model.scale(), 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(model.effective_alpha(), 0.15, epsilon = 1e-12);
    }

    #[test]
    fn negative_strengths_are_rejected() {
        let incidence = IncidenceMatrix::empty(1);
        let x = array![[1.0], [2.0]];
        let y = array![1.0, 2.0];
        assert!(matches!(
            NetworkLasso::new(&incidence, -1.0, 1.0).fit(x.view(), y.view()),
            Err(EstimationError::InvalidParameter { name: "lambda1", .. })
        ));
        assert!(matches!(
            NetworkLasso::new(&incidence, 1.0, -0.5).fit(x.view(), y.view()),
            Err(EstimationError::InvalidParameter { name: "lambda2", .. })
        ));
    }

    #[test]
    fn incidence_width_must_match_features() {
        let incidence = IncidenceMatrix::empty(4);
        let x = array![[1.0, 0.0], [2.0, 1.0]];
        let y = array![1.0, 2.0];
        assert!(matches!(
            NetworkLasso::new(&incidence, 0.1, 1.0).fit(x.view(), y.view()),
            Err(EstimationError::DimensionMismatch {
                expected: 2,
                found: 4,
                ..
            })
        ));
    }

    #[test]
    fn smoothness_pulls_connected_coefficients_together() {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| (((i + 3 * j) * 7) % 10) as f64 - 4.5);
        let y = x.dot(&array![3.0, 0.0]);
        let graph = FeatureGraph::from_parts(2, vec![0], vec![1], vec![1.0]).unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();

        let loose = NetworkLasso::new(&incidence, 0.0, 0.0).fit(x.view(), y.view()).unwrap();
        let smooth = NetworkLasso::new(&incidence, 0.0, 50.0).fit(x.view(), y.view()).unwrap();
        let gap = |fit: &NetworkLassoFit| (fit.coefficients()[0] - fit.coefficients()[1]).abs();
        assert!(gap(&smooth) < gap(&loose));
    }
}
