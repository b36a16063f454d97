//! # Per-SNP Association Tests
//!
//! For every SNP independently, fits `y = a + b * x_snp` by least squares and tests
//! `b = 0` with a two-sided Student t test on `n - 2` degrees of freedom. This is the
//! classic marginal GWAS scan: no covariates and no correction for population
//! structure. Significance is judged against a Bonferroni threshold.

use crate::model::EstimationError;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::io::IsTerminal;

/// The family-wise error rate divided across all tests.
pub const FAMILY_WISE_ALPHA: f64 = 0.05;

/// Below this relative spread a column is treated as monomorphic.
const ZERO_VARIANCE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssociationResult {
    pub snp_index: usize,
    /// Fitted slope of the phenotype on allele count.
    pub beta: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
}

impl AssociationResult {
    /// `-log10(p)`, the quantity plotted on a Manhattan-style scatter.
    /// A p-value of exactly zero maps to infinity.
    pub fn neg_log10_p(&self) -> f64 {
        -self.p_value.log10()
    }

    fn monomorphic(snp_index: usize) -> Self {
        Self {
            snp_index,
            beta: 0.0,
            std_error: f64::NAN,
            t_statistic: 0.0,
            p_value: 1.0,
        }
    }
}

/// The outcome of a full scan: one result per SNP, in column order.
#[derive(Debug, Clone)]
pub struct AssociationScan {
    pub results: Vec<AssociationResult>,
    pub threshold: f64,
}

impl AssociationScan {
    pub fn is_significant(&self, result: &AssociationResult) -> bool {
        result.p_value < self.threshold
    }

    pub fn significant(&self) -> impl Iterator<Item = &AssociationResult> + '_ {
        self.results.iter().filter(|r| self.is_significant(r))
    }
}

/// `FAMILY_WISE_ALPHA / n_tests`.
pub fn bonferroni_threshold(n_tests: usize) -> f64 {
    FAMILY_WISE_ALPHA / n_tests.max(1) as f64
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) =
        ProgressStyle::with_template("> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());
    pb
}

/// Runs the scan with a terminal progress bar.
pub fn univariate_scan(
    genotypes: ArrayView2<f64>,
    phenotype: ArrayView1<f64>,
) -> Result<AssociationScan, EstimationError> {
    let pb = create_progress_bar(genotypes.ncols() as u64, "Testing SNPs");
    let scan = univariate_scan_with_progress(genotypes, phenotype, &pb);
    pb.finish_and_clear();
    scan
}

/// Runs the scan in parallel over SNPs, ticking `pb` once per SNP.
pub fn univariate_scan_with_progress(
    genotypes: ArrayView2<f64>,
    phenotype: ArrayView1<f64>,
    pb: &ProgressBar,
) -> Result<AssociationScan, EstimationError> {
    EstimationError::check_sample_count(genotypes, phenotype)?;
    let n = genotypes.nrows();
    if n < 3 {
        return Err(EstimationError::InsufficientSamples {
            found: n,
            required: 3,
        });
    }
    let dof = (n - 2) as f64;
    let t_dist = StudentsT::new(0.0, 1.0, dof).map_err(|_| EstimationError::InvalidParameter {
        name: "degrees_of_freedom",
        value: dof,
        reason: "must be positive",
    })?;

    let y_mean = phenotype.sum() / n as f64;
    let y_centred = phenotype.mapv(|v| v - y_mean);
    let syy = y_centred.dot(&y_centred);

    let results: Vec<AssociationResult> = (0..genotypes.ncols())
        .into_par_iter()
        .map(|j| {
            let result = test_snp(j, genotypes.column(j), y_centred.view(), syy, &t_dist);
            pb.inc(1);
            result
        })
        .collect();

    let threshold = bonferroni_threshold(results.len());
    let n_significant = results.iter().filter(|r| r.p_value < threshold).count();
    log::info!(
        "Tested {} SNPs on {} samples; {} pass the Bonferroni threshold {:.3e}.",
        results.len(),
        n,
        n_significant,
        threshold
    );

    Ok(AssociationScan { results, threshold })
}

fn test_snp(
    snp_index: usize,
    x: ArrayView1<f64>,
    y_centred: ArrayView1<f64>,
    syy: f64,
    t_dist: &StudentsT,
) -> AssociationResult {
    let n = x.len() as f64;
    let x_mean = x.sum() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (&xi, &yi) in x.iter().zip(y_centred.iter()) {
        let dx = xi - x_mean;
        sxx += dx * dx;
        sxy += dx * yi;
    }
    if sxx <= ZERO_VARIANCE_TOLERANCE * n.max(x_mean * x_mean * n) {
        return AssociationResult::monomorphic(snp_index);
    }

    let beta = sxy / sxx;
    let sse = (syy - beta * sxy).max(0.0);
    let std_error = (sse / (n - 2.0) / sxx).sqrt();

    // Residuals at rounding level count as an exact fit.
    if sse <= f64::EPSILON * syy {
        return AssociationResult {
            snp_index,
            beta,
            std_error,
            t_statistic: beta.signum() * f64::INFINITY,
            p_value: 0.0,
        };
    }

    let t_statistic = beta / std_error;
    let p_value = (2.0 * t_dist.sf(t_statistic.abs())).min(1.0);
    AssociationResult {
        snp_index,
        beta,
        std_error,
        t_statistic,
        p_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, array};

    #[test]
    fn bonferroni_divides_by_test_count() {
        assert_abs_diff_eq!(bonferroni_threshold(1000), 5e-5, epsilon = 1e-18);
        assert_abs_diff_eq!(bonferroni_threshold(0), 0.05, epsilon = 1e-18);
    }

    #[test]
    fn perfectly_correlated_snp_is_significant() {
        let genotypes = array![[0.0, 1.0], [1.0, 0.0], [2.0, 2.0], [0.0, 1.0], [1.0, 2.0], [2.0, 0.0]];
        let phenotype = genotypes.column(0).mapv(|g| 3.0 * g + 1.0);
        let pb = ProgressBar::hidden();
        let scan = univariate_scan_with_progress(genotypes.view(), phenotype.view(), &pb).unwrap();

        let hit = scan.results[0];
        assert!(hit.p_value < 1e-6);
        assert_abs_diff_eq!(hit.beta, 3.0, epsilon = 1e-12);
        assert!(scan.is_significant(&hit));
        assert!(scan.results[1].p_value > 1e-6);
        assert_eq!(scan.significant().count(), 1);
    }

    #[test]
    fn matches_textbook_simple_regression() {
        // x = 1..5, y = [2, 4, 5, 4, 5]: b = 0.6, se = sqrt(2.4 / 3 / 10).
        let genotypes = Array2::from_shape_vec((5, 1), vec![1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        let phenotype = array![2.0, 4.0, 5.0, 4.0, 5.0];
        let scan = univariate_scan_with_progress(genotypes.view(), phenotype.view(), &ProgressBar::hidden()).unwrap();
        let r = scan.results[0];
        assert_abs_diff_eq!(r.beta, 0.6, epsilon = 1e-12);
        assert_abs_diff_eq!(r.std_error, (0.08f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(r.t_statistic, 0.6 / (0.08f64).sqrt(), epsilon = 1e-10);
        // Two-sided p for t = 2.1213 on 3 degrees of freedom.
        assert_abs_diff_eq!(r.p_value, 0.1240, epsilon = 5e-4);
    }

    #[test]
    fn monomorphic_snp_gets_unit_p_value() {
        let genotypes = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 1.0]];
        let phenotype = array![0.5, 1.0, 2.5, 1.5];
        let scan = univariate_scan_with_progress(genotypes.view(), phenotype.view(), &ProgressBar::hidden()).unwrap();
        assert_eq!(scan.results[0].p_value, 1.0);
        assert_eq!(scan.results[0].beta, 0.0);
        assert!(scan.results[1].p_value < 1.0);
    }

    #[test]
    fn needs_three_samples() {
        let genotypes = Array2::<f64>::zeros((2, 3));
        let phenotype = Array1::<f64>::zeros(2);
        assert!(matches!(
            univariate_scan_with_progress(genotypes.view(), phenotype.view(), &ProgressBar::hidden()),
            Err(EstimationError::InsufficientSamples {
                found: 2,
                required: 3
            })
        ));
    }

    #[test]
    fn neg_log10_of_small_p() {
        let r = AssociationResult {
            snp_index: 0,
            beta: 1.0,
            std_error: 0.1,
            t_statistic: 10.0,
            p_value: 1e-8,
        };
        assert_abs_diff_eq!(r.neg_log10_p(), 8.0, epsilon = 1e-12);
    }
}
