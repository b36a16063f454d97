//! # GWAS Analysis Pipeline
//!
//! Ties the pieces together for one aligned trait: univariate scans on all samples, then
//! for each whole-genome model a cross-validated hyperparameter search on the training
//! split, a refit of the winner, and an evaluation on the held-out split.
//!
//! Every evaluation uses the predictions and coefficients of the model being evaluated.

use crate::association::{AssociationScan, univariate_scan};
use crate::config::AnalysisConfig;
use crate::data::{DataError, GeneMap};
use crate::dataset::{AlignedDataset, TrainTestSplit};
use crate::incidence::IncidenceMatrix;
use crate::linear::LinearRegression;
use crate::metrics::{count_nonzero, explained_variance_score, r2_score};
use crate::model::{EstimationError, FittedRegressor, ModelError, ModelSpec, Regressor, TrainedModel};
use crate::network::NetworkLasso;
use crate::penalized::{ElasticNet, Lasso};
use crate::selection::{GridSearchResult, KFold, grid_search};
use itertools::iproduct;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A SNP with a nonzero coefficient.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSnp {
    pub index: usize,
    pub name: String,
    pub coefficient: f64,
    pub genes: Vec<String>,
}

/// Held-out performance of one fitted model.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub explained_variance: f64,
    pub r2: f64,
    pub n_nonzero: usize,
    /// Selected SNPs, largest absolute coefficient first.
    pub selected: Vec<SelectedSnp>,
}

#[derive(Debug, Clone)]
pub struct ModelReport {
    pub model: TrainedModel,
    pub evaluation: Evaluation,
    /// Size of the hyperparameter grid; zero when nothing was searched.
    pub n_candidates: usize,
}

pub struct GwasPipeline {
    dataset: AlignedDataset,
    config: AnalysisConfig,
    genes: Option<GeneMap>,
}

impl GwasPipeline {
    pub fn new(dataset: AlignedDataset, config: AnalysisConfig) -> Self {
        Self {
            dataset,
            config,
            genes: None,
        }
    }

    /// Attaches a SNP-to-gene map used to annotate selected SNPs.
    pub fn with_genes(mut self, genes: GeneMap) -> Self {
        self.genes = Some(genes);
        self
    }

    pub fn dataset(&self) -> &AlignedDataset {
        &self.dataset
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn genes(&self) -> Option<&GeneMap> {
        self.genes.as_ref()
    }

    pub fn split(&self) -> Result<TrainTestSplit, PipelineError> {
        let split = self.dataset.split(&self.config.split)?;
        log::info!(
            "Split {} samples into {} training and {} test samples (seed {}).",
            self.dataset.n_samples(),
            split.train_ids.len(),
            split.test_ids.len(),
            self.config.split.seed
        );
        Ok(split)
    }

    /// Per-SNP tests over all aligned samples.
    pub fn associate(&self) -> Result<AssociationScan, PipelineError> {
        Ok(univariate_scan(
            self.dataset.genotypes.view(),
            self.dataset.phenotype.view(),
        )?)
    }

    fn cv(&self) -> KFold {
        KFold::new(self.config.search.folds)
    }

    pub fn fit_ols(&self, split: &TrainTestSplit) -> Result<ModelReport, PipelineError> {
        log::info!("Fitting ordinary least squares.");
        let fitted = LinearRegression::default().fit(split.x_train.view(), split.y_train.view())?;
        self.evaluate(ModelSpec::Ols, &fitted, split, None, 0)
    }

    pub fn fit_lasso(&self, split: &TrainTestSplit) -> Result<ModelReport, PipelineError> {
        let solver = self.config.solver;
        let search = grid_search(
            &self.config.search.lasso_alphas,
            |&alpha| Lasso::new(alpha).with_solver(solver),
            split.x_train.view(),
            split.y_train.view(),
            &self.cv(),
        )?;
        let alpha = search.best;
        log::info!("Refitting Lasso with alpha={alpha:.4e}.");
        let fitted = Lasso::new(alpha)
            .with_solver(solver)
            .fit(split.x_train.view(), split.y_train.view())?;
        self.report(ModelSpec::Lasso { alpha }, &fitted, split, &search)
    }

    pub fn fit_elastic_net(&self, split: &TrainTestSplit) -> Result<ModelReport, PipelineError> {
        let solver = self.config.solver;
        let grid: Vec<(f64, f64)> = iproduct!(
            self.config.search.elastic_net_alphas.iter().copied(),
            self.config.search.l1_ratios.iter().copied()
        )
        .collect();
        let search = grid_search(
            &grid,
            |&(alpha, l1_ratio)| ElasticNet::new(alpha, l1_ratio).with_solver(solver),
            split.x_train.view(),
            split.y_train.view(),
            &self.cv(),
        )?;
        let (alpha, l1_ratio) = search.best;
        log::info!("Refitting Elastic Net with alpha={alpha:.4e}, l1_ratio={l1_ratio:.2}.");
        let fitted = ElasticNet::new(alpha, l1_ratio)
            .with_solver(solver)
            .fit(split.x_train.view(), split.y_train.view())?;
        self.report(ModelSpec::ElasticNet { alpha, l1_ratio }, &fitted, split, &search)
    }

    pub fn fit_network_lasso(
        &self,
        split: &TrainTestSplit,
        incidence: &IncidenceMatrix,
    ) -> Result<ModelReport, PipelineError> {
        let solver = self.config.solver;
        let grid: Vec<(f64, f64)> = iproduct!(
            self.config.search.network_lambda1.iter().copied(),
            self.config.search.network_lambda2.iter().copied()
        )
        .collect();
        let search = grid_search(
            &grid,
            |&(lambda1, lambda2)| NetworkLasso::new(incidence, lambda1, lambda2).with_solver(solver),
            split.x_train.view(),
            split.y_train.view(),
            &self.cv(),
        )?;
        let (lambda1, lambda2) = search.best;
        log::info!(
            "Refitting network-constrained Lasso with lambda1={lambda1:.4e}, lambda2={lambda2:.4e} over {} edges.",
            incidence.n_edges()
        );
        let fitted = NetworkLasso::new(incidence, lambda1, lambda2)
            .with_solver(solver)
            .fit(split.x_train.view(), split.y_train.view())?;
        self.report(ModelSpec::NetworkLasso { lambda1, lambda2 }, &fitted, split, &search)
    }

    fn report<F: FittedRegressor, P>(
        &self,
        spec: ModelSpec,
        fitted: &F,
        split: &TrainTestSplit,
        search: &GridSearchResult<P>,
    ) -> Result<ModelReport, PipelineError> {
        self.evaluate(
            spec,
            fitted,
            split,
            Some(search.best_score),
            search.candidates.len(),
        )
    }

    /// Scores `fitted` on the test split and packages it as a saveable model.
    pub fn evaluate<F: FittedRegressor>(
        &self,
        spec: ModelSpec,
        fitted: &F,
        split: &TrainTestSplit,
        cv_score: Option<f64>,
        n_candidates: usize,
    ) -> Result<ModelReport, PipelineError> {
        let y_hat = fitted.predict(split.x_test.view())?;
        let explained_variance = explained_variance_score(split.y_test.view(), y_hat.view());
        let r2 = r2_score(split.y_test.view(), y_hat.view());
        let n_nonzero = count_nonzero(fitted.coefficients());

        let model = TrainedModel::from_fit(
            spec,
            &self.dataset.trait_name,
            &self.dataset.snp_names,
            fitted,
            cv_score,
        );
        let mut selected: Vec<SelectedSnp> = model
            .selected_features()
            .into_iter()
            .map(|index| SelectedSnp {
                index,
                name: model.snp_names[index].clone(),
                coefficient: model.coefficients[index],
                genes: self
                    .genes
                    .as_ref()
                    .map(|g| g.genes_for(&model.snp_names[index]).to_vec())
                    .unwrap_or_default(),
            })
            .collect();
        selected.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));

        log::info!(
            "{spec}: test explained variance {explained_variance:.4}, R^2 {r2:.4}, {n_nonzero} of {} coefficients nonzero.",
            model.coefficients.len()
        );
        Ok(ModelReport {
            model,
            evaluation: Evaluation {
                explained_variance,
                r2,
                n_nonzero,
                selected,
            },
            n_candidates,
        })
    }
}
