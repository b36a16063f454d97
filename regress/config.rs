//! Tuning knobs of an analysis, optionally read from a TOML file.
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration:
//!
//! ```toml
//! [split]
//! test_fraction = 0.25
//! seed = 7
//!
//! [search]
//! folds = 5
//! lasso_alphas = [0.001, 0.01, 0.1]
//!
//! [graph]
//! degree_convention = "doubled-row-count"
//! ```

use crate::dataset::SplitOptions;
use crate::incidence::DegreeConvention;
use crate::model::EstimationError;
use crate::selection::logspace;
use crate::solver::SolverOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

/// Hyperparameter grids searched by cross-validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchGrid {
    pub folds: usize,
    pub lasso_alphas: Vec<f64>,
    pub elastic_net_alphas: Vec<f64>,
    pub l1_ratios: Vec<f64>,
    pub network_lambda1: Vec<f64>,
    pub network_lambda2: Vec<f64>,
}

impl Default for SearchGrid {
    fn default() -> Self {
        Self {
            folds: 5,
            lasso_alphas: logspace(-4.0, 0.0, 9),
            elastic_net_alphas: logspace(-4.0, 0.0, 9),
            l1_ratios: vec![0.1, 0.3, 0.5, 0.7, 0.9, 0.95, 0.99],
            network_lambda1: logspace(-4.0, 0.0, 5),
            network_lambda2: vec![0.1, 1.0, 10.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphOptions {
    pub degree_convention: DegreeConvention,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PhenotypeOptions {
    /// Field separator of the phenotype table.
    pub separator: char,
}

impl Default for PhenotypeOptions {
    fn default() -> Self {
        Self { separator: '\t' }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub split: SplitOptions,
    pub solver: SolverOptions,
    pub search: SearchGrid,
    pub graph: GraphOptions,
    pub phenotype: PhenotypeOptions,
}

fn check_grid(field: &'static str, values: &[f64]) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::Invalid {
            field,
            reason: "the grid is empty".to_string(),
        });
    }
    if let Some(bad) = values.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{bad} is not a finite, non-negative value"),
        });
    }
    Ok(())
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded analysis configuration from '{}'.", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.solver.validate()?;
        if self.search.folds < 2 {
            return Err(ConfigError::Invalid {
                field: "search.folds",
                reason: format!("{} folds; at least 2 are required", self.search.folds),
            });
        }
        check_grid("search.lasso_alphas", &self.search.lasso_alphas)?;
        check_grid("search.elastic_net_alphas", &self.search.elastic_net_alphas)?;
        check_grid("search.network_lambda1", &self.search.network_lambda1)?;
        check_grid("search.network_lambda2", &self.search.network_lambda2)?;
        check_grid("search.l1_ratios", &self.search.l1_ratios)?;
        if self.search.l1_ratios.iter().any(|&r| r > 1.0) {
            return Err(ConfigError::Invalid {
                field: "search.l1_ratios",
                reason: "mixing ratios must lie in [0, 1]".to_string(),
            });
        }
        if !self.phenotype.separator.is_ascii() {
            return Err(ConfigError::Invalid {
                field: "phenotype.separator",
                reason: format!("'{}' is not a single-byte character", self.phenotype.separator),
            });
        }
        Ok(())
    }

    /// The phenotype separator as a byte. Validated to be ASCII.
    pub fn separator_byte(&self) -> u8 {
        u8::try_from(self.phenotype.separator).unwrap_or(b'\t')
    }
}
