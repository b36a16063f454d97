//! Goodness-of-fit measures shared by `score`, cross-validation and held-out evaluation.

use ndarray::ArrayView1;

/// Coefficients with magnitude at or below this value count as zero when measuring sparsity.
pub const NONZERO_TOLERANCE: f64 = 1e-10;

/// Coefficient of determination, `1 - SS_res / SS_tot`.
///
/// A constant target scores 1.0 when predicted exactly and 0.0 otherwise.
pub fn r2_score(y: ArrayView1<f64>, y_hat: ArrayView1<f64>) -> f64 {
    debug_assert_eq!(y.len(), y_hat.len());
    if y.is_empty() {
        return f64::NAN;
    }
    let mean = y.sum() / y.len() as f64;
    let ss_tot: f64 = y.iter().map(|&v| (v - mean).powi(2)).sum();
    let ss_res: f64 = y
        .iter()
        .zip(y_hat.iter())
        .map(|(&obs, &fit)| (obs - fit).powi(2))
        .sum();
    ratio_score(ss_res, ss_tot)
}

/// Explained variance, `1 - Var(y - y_hat) / Var(y)`.
///
/// Unlike R^2 this ignores a constant offset between predictions and observations.
pub fn explained_variance_score(y: ArrayView1<f64>, y_hat: ArrayView1<f64>) -> f64 {
    debug_assert_eq!(y.len(), y_hat.len());
    if y.is_empty() {
        return f64::NAN;
    }
    let residuals = &y - &y_hat;
    ratio_score(population_variance(residuals.view()), population_variance(y))
}

/// Number of coefficients whose magnitude exceeds [`NONZERO_TOLERANCE`].
pub fn count_nonzero(coefficients: ArrayView1<f64>) -> usize {
    coefficients
        .iter()
        .filter(|c| c.abs() > NONZERO_TOLERANCE)
        .count()
}

fn population_variance(values: ArrayView1<f64>) -> f64 {
    let n = values.len() as f64;
    let mean = values.sum() / n;
    values.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n
}

fn ratio_score(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn perfect_prediction_scores_one() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        assert_abs_diff_eq!(r2_score(y.view(), y.view()), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(explained_variance_score(y.view(), y.view()), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn mean_prediction_scores_zero_r2() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let y_hat = array![2.5, 2.5, 2.5, 2.5];
        assert_abs_diff_eq!(r2_score(y.view(), y_hat.view()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn explained_variance_ignores_offset() {
        let y = array![1.0, 2.0, 3.0, 4.0];
        let shifted = &y + 10.0;
        assert_abs_diff_eq!(
            explained_variance_score(y.view(), shifted.view()),
            1.0,
            epsilon = 1e-12
        );
        assert!(r2_score(y.view(), shifted.view()) < 0.0);
    }

    #[test]
    fn constant_target_convention() {
        let y = array![3.0, 3.0, 3.0];
        let wrong = array![3.0, 3.0, 4.0];
        assert_eq!(r2_score(y.view(), y.view()), 1.0);
        assert_eq!(r2_score(y.view(), wrong.view()), 0.0);
    }

    #[test]
    fn nonzero_count_uses_tolerance() {
        let coefficients = array![0.0, 1e-14, -0.3, 2.0];
        assert_eq!(count_nonzero(coefficients.view()), 2);
    }
}
