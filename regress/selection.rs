//! Exhaustive hyperparameter search under k-fold cross-validation.
//!
//! Every candidate is fitted once per fold on the remaining folds and scored by explained
//! variance on the held-out fold. The candidate with the highest mean score wins.

use crate::metrics::explained_variance_score;
use crate::model::{EstimationError, FittedRegressor, Regressor};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Contiguous, unshuffled k-fold partitioning. The first `n % k` folds hold one extra row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    pub n_splits: usize,
}

/// Row indices of one train/validation partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Default for KFold {
    fn default() -> Self {
        Self { n_splits: 5 }
    }
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    pub fn split(&self, n_samples: usize) -> Result<Vec<Fold>, EstimationError> {
        if self.n_splits < 2 {
            return Err(EstimationError::InvalidParameter {
                name: "n_splits",
                value: self.n_splits as f64,
                reason: "cross-validation needs at least 2 folds",
            });
        }
        if n_samples < self.n_splits {
            return Err(EstimationError::InsufficientSamples {
                found: n_samples,
                required: self.n_splits,
            });
        }

        let base = n_samples / self.n_splits;
        let remainder = n_samples % self.n_splits;
        let mut folds = Vec::with_capacity(self.n_splits);
        let mut start = 0;
        for k in 0..self.n_splits {
            let size = base + usize::from(k < remainder);
            let stop = start + size;
            folds.push(Fold {
                train: (0..start).chain(stop..n_samples).collect(),
                test: (start..stop).collect(),
            });
            start = stop;
        }
        Ok(folds)
    }
}

#[derive(Debug, Clone)]
pub struct CandidateScore<P> {
    pub params: P,
    pub mean_score: f64,
    pub fold_scores: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct GridSearchResult<P> {
    pub best: P,
    pub best_score: f64,
    /// All candidates, in grid order.
    pub candidates: Vec<CandidateScore<P>>,
}

/// NaN ranks below every real score.
fn compare_scores(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Cross-validates every candidate and returns the best by mean explained variance.
///
/// `build` turns a candidate into an unfitted estimator. All candidate/fold fits run
/// in parallel; any fit error aborts the search. Ties keep the earlier candidate.
pub fn grid_search<P, R, B>(
    candidates: &[P],
    build: B,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    cv: &KFold,
) -> Result<GridSearchResult<P>, EstimationError>
where
    P: Clone + Sync,
    R: Regressor,
    B: Fn(&P) -> R + Sync,
{
    if candidates.is_empty() {
        return Err(EstimationError::EmptyGrid);
    }
    EstimationError::check_sample_count(x, y)?;
    let folds = cv.split(x.nrows())?;
    log::info!(
        "Grid search over {} candidates x {} folds ({} fits).",
        candidates.len(),
        folds.len(),
        candidates.len() * folds.len()
    );

    let jobs: Vec<(usize, usize)> = (0..candidates.len())
        .flat_map(|c| (0..folds.len()).map(move |f| (c, f)))
        .collect();

    let scores: Vec<f64> = jobs
        .par_iter()
        .map(|&(c, f)| {
            let fold = &folds[f];
            let x_train = x.select(Axis(0), &fold.train);
            let y_train = y.select(Axis(0), &fold.train);
            let x_test = x.select(Axis(0), &fold.test);
            let y_test: Array1<f64> = y.select(Axis(0), &fold.test);

            let fitted = build(&candidates[c]).fit(x_train.view(), y_train.view())?;
            let y_hat = fitted.predict(x_test.view())?;
            Ok(explained_variance_score(y_test.view(), y_hat.view()))
        })
        .collect::<Result<_, EstimationError>>()?;

    let n_folds = folds.len();
    let results: Vec<CandidateScore<P>> = candidates
        .iter()
        .zip(scores.chunks(n_folds))
        .map(|(params, fold_scores)| CandidateScore {
            params: params.clone(),
            mean_score: fold_scores.iter().sum::<f64>() / n_folds as f64,
            fold_scores: fold_scores.to_vec(),
        })
        .collect();

    let mut best_index = 0;
    for (index, candidate) in results.iter().enumerate().skip(1) {
        if compare_scores(candidate.mean_score, results[best_index].mean_score) == Ordering::Greater
        {
            best_index = index;
        }
    }
    let best = results[best_index].params.clone();
    let best_score = results[best_index].mean_score;
    log::info!("Best mean cross-validated explained variance: {best_score:.4}");

    Ok(GridSearchResult {
        best,
        best_score,
        candidates: results,
    })
}

/// `num` values spaced evenly on a log10 scale from `10^start` to `10^stop`, inclusive.
pub fn logspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![10f64.powf(start)],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| 10f64.powf(start + step * i as f64))
                .collect()
        }
    }
}
