//! Sample alignment and train/test partitioning.

use crate::data::{DataError, GenotypeData, PhenotypeTable};
use ahash::AHashMap;
use ndarray::{Array1, Array2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Genotype rows of the samples that have a value for one trait, with that trait as `y`.
#[derive(Debug, Clone)]
pub struct AlignedDataset {
    pub trait_name: String,
    pub sample_ids: Vec<i64>,
    pub snp_names: Vec<String>,
    pub genotypes: Array2<f64>,
    pub phenotype: Array1<f64>,
}

/// How the aligned samples are divided for held-out evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SplitOptions {
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub train_ids: Vec<i64>,
    pub test_ids: Vec<i64>,
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

fn index_unique(ids: &[i64]) -> Result<AHashMap<i64, usize>, DataError> {
    let mut index = AHashMap::with_capacity(ids.len());
    for (row, &id) in ids.iter().enumerate() {
        if index.insert(id, row).is_some() {
            return Err(DataError::DuplicateSampleId(id));
        }
    }
    Ok(index)
}

impl AlignedDataset {
    /// Keeps genotype rows, in genotype order, whose sample has a finite value for `trait_name`.
    pub fn align(
        genotypes: &GenotypeData,
        phenotypes: &PhenotypeTable,
        trait_name: &str,
    ) -> Result<Self, DataError> {
        let values = phenotypes.trait_values(trait_name)?;
        index_unique(&genotypes.sample_ids)?;
        let phenotype_rows = index_unique(&phenotypes.sample_ids)?;

        let mut rows = Vec::new();
        let mut y = Vec::new();
        for (row, id) in genotypes.sample_ids.iter().enumerate() {
            let value = phenotype_rows.get(id).and_then(|&p| values[p]);
            if let Some(value) = value.filter(|v| v.is_finite()) {
                rows.push(row);
                y.push(value);
            }
        }

        if rows.is_empty() {
            return Err(DataError::NoOverlappingSamples(trait_name.to_string()));
        }
        log::info!(
            "Trait '{}': {} of {} genotyped samples have a phenotype value.",
            trait_name,
            rows.len(),
            genotypes.sample_ids.len()
        );

        Ok(Self {
            trait_name: trait_name.to_string(),
            sample_ids: rows.iter().map(|&r| genotypes.sample_ids[r]).collect(),
            snp_names: genotypes.snp_names.clone(),
            genotypes: genotypes.matrix.select(Axis(0), &rows),
            phenotype: Array1::from_vec(y),
        })
    }

    pub fn n_samples(&self) -> usize {
        self.genotypes.nrows()
    }

    pub fn n_snps(&self) -> usize {
        self.genotypes.ncols()
    }

    /// Shuffles sample indices with a seeded generator and holds out
    /// `ceil(test_fraction * n)` of them. Both parts keep genotype order.
    pub fn split(&self, options: &SplitOptions) -> Result<TrainTestSplit, DataError> {
        let n = self.n_samples();
        let fraction = options.test_fraction;
        let invalid = |reason| DataError::InvalidSplit {
            n_samples: n,
            fraction,
            reason,
        };
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(invalid("the test fraction must lie strictly between 0 and 1"));
        }
        let n_test = (fraction * n as f64).ceil() as usize;
        if n_test >= n {
            return Err(invalid("no samples would remain for training"));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(options.seed));
        let (test, train) = order.split_at_mut(n_test);
        test.sort_unstable();
        train.sort_unstable();
        let (test, train) = (&*test, &*train);

        let ids = |rows: &[usize]| -> Vec<i64> { rows.iter().map(|&r| self.sample_ids[r]).collect() };
        Ok(TrainTestSplit {
            train_ids: ids(train),
            test_ids: ids(test),
            x_train: self.genotypes.select(Axis(0), train),
            y_train: self.phenotype.select(Axis(0), train),
            x_test: self.genotypes.select(Axis(0), test),
            y_test: self.phenotype.select(Axis(0), test),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn genotypes() -> GenotypeData {
        GenotypeData {
            sample_ids: vec![10, 20, 30, 40, 50],
            snp_names: vec!["a".into(), "b".into()],
            matrix: array![[0.0, 1.0], [1.0, 1.0], [2.0, 0.0], [1.0, 2.0], [0.0, 0.0]],
        }
    }

    fn phenotypes() -> PhenotypeTable {
        PhenotypeTable::new(
            vec![50, 30, 20, 99],
            vec!["FT10".into()],
            vec![vec![Some(5.0), Some(3.0), None, Some(9.0)]],
        )
        .unwrap()
    }

    #[test]
    fn aligns_by_id_in_genotype_order() {
        let data = AlignedDataset::align(&genotypes(), &phenotypes(), "FT10").unwrap();
        assert_eq!(data.sample_ids, vec![30, 50]);
        assert_eq!(data.phenotype, array![3.0, 5.0]);
        assert_eq!(data.genotypes, array![[2.0, 0.0], [0.0, 0.0]]);
        assert_eq!(data.n_snps(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let table = PhenotypeTable::new(vec![10, 10], vec!["t".into()], vec![vec![Some(1.0), Some(2.0)]]).unwrap();
        assert!(matches!(
            AlignedDataset::align(&genotypes(), &table, "t"),
            Err(DataError::DuplicateSampleId(10))
        ));
    }

    #[test]
    fn no_overlap_is_an_error() {
        let table = PhenotypeTable::new(vec![1, 2], vec!["t".into()], vec![vec![Some(1.0), Some(2.0)]]).unwrap();
        assert!(matches!(
            AlignedDataset::align(&genotypes(), &table, "t"),
            Err(DataError::NoOverlappingSamples(_))
        ));
    }

    #[test]
    fn split_is_seeded_and_disjoint() {
        let table = PhenotypeTable::new(
            vec![10, 20, 30, 40, 50],
            vec!["t".into()],
            vec![vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)]],
        )
        .unwrap();
        let data = AlignedDataset::align(&genotypes(), &table, "t").unwrap();
        let options = SplitOptions {
            test_fraction: 0.3,
            seed: 7,
        };
        let first = data.split(&options).unwrap();
        let again = data.split(&options).unwrap();
        assert_eq!(first.test_ids, again.test_ids);
        assert_eq!(first.test_ids.len(), 2);
        assert_eq!(first.train_ids.len(), 3);
        assert!(first.test_ids.iter().all(|id| !first.train_ids.contains(id)));
        assert_eq!(first.x_train.nrows(), first.y_train.len());
        assert_eq!(first.x_test.nrows(), 2);

        let bad = SplitOptions {
            test_fraction: 1.0,
            seed: 0,
        };
        assert!(matches!(data.split(&bad), Err(DataError::InvalidSplit { .. })));
    }
}
