use crate::metrics;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for the model fitting process.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("The design matrix has {x_rows} rows but the target vector has {y_len} elements.")]
    SampleCountMismatch { x_rows: usize, y_len: usize },

    #[error("Dimension mismatch in {context}: expected {expected} features, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Invalid value {value} for parameter '{name}': {reason}.")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("At least {required} samples are required, but only {found} were provided.")]
    InsufficientSamples { found: usize, required: usize },

    #[error("A least-squares solve failed: {0}")]
    LinearSystemSolveFailed(ndarray_linalg::error::LinalgError),

    #[error("The hyperparameter grid contains no candidates.")]
    EmptyGrid,
}

impl EstimationError {
    /// Rejects negative or non-finite regularization strengths.
    pub(crate) fn check_non_negative(name: &'static str, value: f64) -> Result<(), Self> {
        if !value.is_finite() {
            return Err(Self::InvalidParameter {
                name,
                value,
                reason: "must be finite",
            });
        }
        if value < 0.0 {
            return Err(Self::InvalidParameter {
                name,
                value,
                reason: "must be non-negative",
            });
        }
        Ok(())
    }

    pub(crate) fn check_sample_count(
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<(), Self> {
        if x.nrows() != y.len() {
            return Err(Self::SampleCountMismatch {
                x_rows: x.nrows(),
                y_len: y.len(),
            });
        }
        if x.nrows() == 0 {
            return Err(Self::InsufficientSamples {
                found: 0,
                required: 1,
            });
        }
        Ok(())
    }
}

/// Coefficients plus intercept; everything a fitted linear model needs to predict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearPredictor {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
}

impl LinearPredictor {
    pub fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimationError> {
        if x.ncols() != self.n_features() {
            return Err(EstimationError::DimensionMismatch {
                context: "prediction",
                expected: self.n_features(),
                found: x.ncols(),
            });
        }
        Ok(x.dot(&self.coefficients) + self.intercept)
    }
}

/// An unfitted estimator. `fit` consumes training data and produces an immutable fitted model.
pub trait Regressor {
    type Fitted: FittedRegressor;

    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<Self::Fitted, EstimationError>;
}

/// A fitted linear model.
pub trait FittedRegressor {
    /// The predictor used by `predict` and `score`.
    fn predictor(&self) -> &LinearPredictor;

    /// Coefficients on the original feature scale, used for interpretation.
    fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.predictor().coefficients.view()
    }

    fn intercept(&self) -> f64 {
        self.predictor().intercept
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, EstimationError> {
        self.predictor().predict(x)
    }

    /// R^2 of the predictions on `(x, y)`.
    fn score(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<f64, EstimationError> {
        EstimationError::check_sample_count(x, y)?;
        let y_hat = self.predict(x)?;
        Ok(metrics::r2_score(y, y_hat.view()))
    }
}

/// Which estimator produced a model, together with its hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ModelSpec {
    Ols,
    Lasso { alpha: f64 },
    ElasticNet { alpha: f64, l1_ratio: f64 },
    NetworkLasso { lambda1: f64, lambda2: f64 },
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ols => write!(f, "OLS"),
            Self::Lasso { alpha } => write!(f, "Lasso(alpha={alpha:.4e})"),
            Self::ElasticNet { alpha, l1_ratio } => {
                write!(f, "ElasticNet(alpha={alpha:.4e}, l1_ratio={l1_ratio:.2})")
            }
            Self::NetworkLasso { lambda1, lambda2 } => {
                write!(f, "NetworkLasso(lambda1={lambda1:.4e}, lambda2={lambda2:.4e})")
            }
        }
    }
}

/// Custom error type for model loading, saving, and prediction.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Genotype matrix has {found} SNP columns, but the model was trained on {expected}.")]
    MismatchedSnpCount { found: usize, expected: usize },
    #[error("Model file is inconsistent: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

/// The top-level, self-contained, trained model artifact.
/// This is the structure that gets saved to and loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub trait_name: String,
    /// Mean cross-validated explained variance of the selected hyperparameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_score: Option<f64>,
    pub snp_names: Vec<String>,
    /// Coefficients on the original feature scale, one per SNP.
    pub coefficients: Vec<f64>,
    pub spec: ModelSpec,
    pub predictor: LinearPredictor,
}

impl TrainedModel {
    pub fn from_fit<F: FittedRegressor>(
        spec: ModelSpec,
        trait_name: &str,
        snp_names: &[String],
        fitted: &F,
        cv_score: Option<f64>,
    ) -> Self {
        Self {
            trait_name: trait_name.to_string(),
            cv_score,
            snp_names: snp_names.to_vec(),
            coefficients: fitted.coefficients().to_vec(),
            spec,
            predictor: fitted.predictor().clone(),
        }
    }

    /// Predicts phenotypes for a genotype matrix whose columns follow `snp_names`.
    pub fn predict(&self, genotypes: ArrayView2<f64>) -> Result<Array1<f64>, ModelError> {
        if genotypes.ncols() != self.snp_names.len() {
            return Err(ModelError::MismatchedSnpCount {
                found: genotypes.ncols(),
                expected: self.snp_names.len(),
            });
        }
        Ok(self.predictor.predict(genotypes)?)
    }

    /// Indices of SNPs with a nonzero coefficient, in column order.
    pub fn selected_features(&self) -> Vec<usize> {
        self.coefficients
            .iter()
            .enumerate()
            .filter(|(_, c)| c.abs() > metrics::NONZERO_TOLERANCE)
            .map(|(index, _)| index)
            .collect()
    }

    /// Saves the trained model to a file in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a trained model from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let model: Self = toml::from_str(&toml_string)?;
        let n_snps = model.snp_names.len();
        if model.coefficients.len() != n_snps || model.predictor.n_features() != n_snps {
            return Err(ModelError::Inconsistent(format!(
                "{} SNP names, {} coefficients, {} predictor weights",
                n_snps,
                model.coefficients.len(),
                model.predictor.n_features()
            )));
        }
        Ok(model)
    }
}
