//! # Data Loading and Validation Module
//!
//! Reads the plain-text inputs of a GWAS analysis and turns them into validated
//! in-memory structures:
//!
//! - SNP names: whitespace-separated tokens.
//! - Sample IDs: one integer per line, in genotype row order.
//! - Genotype matrix: whitespace-delimited integer allele counts, samples x SNPs.
//! - Phenotype table: delimited text with a header, family and individual IDs in the
//!   first two columns, one named trait per remaining column. `NA` or an empty field
//!   marks a missing value.
//! - SNP-to-gene map: a SNP name followed by zero or more gene identifiers per line.
//! - Feature graph: `row column weight` per line.
//!
//! Any path ending in `.gz` is decompressed on the fly. Failures are treated as user
//! input errors and reported with the offending path and line.

use crate::incidence::{FeatureGraph, GraphError};
use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use ndarray::Array2;
use polars::io::mmap::MmapBytesReader;
use polars::prelude::*;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::Path;
use thiserror::Error;

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Malformed record in '{path}' at line {line}: {message}")]
    Malformed {
        path: String,
        line: usize,
        message: String,
    },
    #[error("The file '{0}' contains no records.")]
    EmptyFile(String),
    #[error("Shape mismatch: {what} has {found} entries, but {expected} were expected.")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(
        "The phenotype table '{path}' has {found} columns; at least 3 (FID, IID, and one trait) are required."
    )]
    TooFewColumns { path: String, found: usize },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the sample ID column '{0}'.")]
    MissingValuesFound(String),
    #[error("The trait '{name}' is not in the phenotype table. Available traits: {available}")]
    TraitNotFound { name: String, available: String },
    #[error("Sample ID {0} occurs more than once.")]
    DuplicateSampleId(i64),
    #[error("No genotyped sample has a non-missing value for trait '{0}'.")]
    NoOverlappingSamples(String),
    #[error("Cannot split {n_samples} samples with test fraction {fraction}: {reason}.")]
    InvalidSplit {
        n_samples: usize,
        fraction: f64,
        reason: &'static str,
    },
    #[error("Invalid feature graph: {0}")]
    Graph(#[from] GraphError),
}

/// Genotypes with their row and column labels.
#[derive(Debug, Clone)]
pub struct GenotypeData {
    pub sample_ids: Vec<i64>,
    pub snp_names: Vec<String>,
    /// Shape: `[sample_ids.len(), snp_names.len()]`.
    pub matrix: Array2<f64>,
}

/// Per-sample trait values keyed by individual ID.
#[derive(Debug, Clone)]
pub struct PhenotypeTable {
    pub sample_ids: Vec<i64>,
    pub trait_names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl PhenotypeTable {
    pub fn new(
        sample_ids: Vec<i64>,
        trait_names: Vec<String>,
        columns: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, DataError> {
        if trait_names.len() != columns.len() {
            return Err(DataError::ShapeMismatch {
                what: "phenotype trait columns",
                expected: trait_names.len(),
                found: columns.len(),
            });
        }
        if let Some(column) = columns.iter().find(|c| c.len() != sample_ids.len()) {
            return Err(DataError::ShapeMismatch {
                what: "phenotype column",
                expected: sample_ids.len(),
                found: column.len(),
            });
        }
        Ok(Self {
            sample_ids,
            trait_names,
            columns,
        })
    }

    /// The values of one trait, aligned with `sample_ids`. `None` is missing.
    pub fn trait_values(&self, name: &str) -> Result<&[Option<f64>], DataError> {
        self.trait_names
            .iter()
            .position(|t| t == name)
            .map(|index| self.columns[index].as_slice())
            .ok_or_else(|| DataError::TraitNotFound {
                name: name.to_string(),
                available: self.trait_names.join(", "),
            })
    }
}

/// SNP name to nearby or overlapping genes.
#[derive(Debug, Clone, Default)]
pub struct GeneMap {
    genes: AHashMap<String, Vec<String>>,
}

impl GeneMap {
    pub fn genes_for(&self, snp: &str) -> &[String] {
        self.genes.get(snp).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.genes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("gz")
}

/// Opens a text file, transparently decompressing `.gz` inputs.
fn open_text(path: &Path) -> Result<Box<dyn BufRead>, DataError> {
    let file = File::open(path)?;
    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn malformed(path: &Path, line: usize, message: impl Into<String>) -> DataError {
    DataError::Malformed {
        path: path.display().to_string(),
        line,
        message: message.into(),
    }
}

/// Iterates non-blank lines with 1-based line numbers, `#` comments stripped.
fn for_each_record<F>(path: &Path, mut visit: F) -> Result<(), DataError>
where
    F: FnMut(usize, &str) -> Result<(), DataError>,
{
    for (index, line) in open_text(path)?.lines().enumerate() {
        let line = line?;
        let content = line.split('#').next().unwrap_or("").trim();
        if !content.is_empty() {
            visit(index + 1, content)?;
        }
    }
    Ok(())
}

fn parse_token<T: lexical_core::FromLexical>(
    token: &str,
    path: &Path,
    line: usize,
    expected: &str,
) -> Result<T, DataError> {
    lexical_core::parse::<T>(token.as_bytes())
        .map_err(|_| malformed(path, line, format!("expected {expected}, found '{token}'")))
}

pub fn load_snp_names(path: &Path) -> Result<Vec<String>, DataError> {
    let mut names = Vec::new();
    for_each_record(path, |_, content| {
        names.extend(content.split_whitespace().map(str::to_string));
        Ok(())
    })?;
    if names.is_empty() {
        return Err(DataError::EmptyFile(path.display().to_string()));
    }
    Ok(names)
}

pub fn load_sample_ids(path: &Path) -> Result<Vec<i64>, DataError> {
    let mut ids = Vec::new();
    for_each_record(path, |line, content| {
        ids.push(parse_token::<i64>(content, path, line, "an integer sample ID")?);
        Ok(())
    })?;
    if ids.is_empty() {
        return Err(DataError::EmptyFile(path.display().to_string()));
    }
    Ok(ids)
}

/// Reads an integer matrix; every row must have the same number of columns.
pub fn load_genotype_matrix(path: &Path) -> Result<Array2<f64>, DataError> {
    let mut values = Vec::new();
    let mut n_rows = 0;
    let mut n_cols: Option<usize> = None;
    for_each_record(path, |line, content| {
        let before = values.len();
        for token in content.split_whitespace() {
            let allele_count = parse_token::<i64>(token, path, line, "an integer genotype")?;
            values.push(allele_count as f64);
        }
        let width = values.len() - before;
        match n_cols {
            None => n_cols = Some(width),
            Some(expected) if expected != width => {
                return Err(malformed(
                    path,
                    line,
                    format!("row has {width} genotypes, previous rows have {expected}"),
                ));
            }
            Some(_) => {}
        }
        n_rows += 1;
        Ok(())
    })?;

    let n_cols = n_cols.ok_or_else(|| DataError::EmptyFile(path.display().to_string()))?;
    Array2::from_shape_vec((n_rows, n_cols), values).map_err(|e| malformed(path, n_rows, e.to_string()))
}

/// Loads the three genotype inputs and checks that their shapes agree.
pub fn load_genotypes(
    snp_names_path: &Path,
    sample_ids_path: &Path,
    matrix_path: &Path,
) -> Result<GenotypeData, DataError> {
    let snp_names = load_snp_names(snp_names_path)?;
    let sample_ids = load_sample_ids(sample_ids_path)?;
    let matrix = load_genotype_matrix(matrix_path)?;

    if matrix.nrows() != sample_ids.len() {
        return Err(DataError::ShapeMismatch {
            what: "genotype matrix rows",
            expected: sample_ids.len(),
            found: matrix.nrows(),
        });
    }
    if matrix.ncols() != snp_names.len() {
        return Err(DataError::ShapeMismatch {
            what: "genotype matrix columns",
            expected: snp_names.len(),
            found: matrix.ncols(),
        });
    }
    log::info!(
        "Loaded genotypes for {} samples x {} SNPs.",
        matrix.nrows(),
        matrix.ncols()
    );
    Ok(GenotypeData {
        sample_ids,
        snp_names,
        matrix,
    })
}

fn read_delimited<R: MmapBytesReader>(reader: R, separator: u8) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|options| {
            options
                .with_separator(separator)
                .with_null_values(Some(NullValues::AllColumnsSingle("NA".into())))
        })
        .into_reader_with_file_handle(reader)
        .finish()
}

fn column_as(
    column: &Column,
    dtype: &DataType,
    expected_type: &'static str,
) -> Result<Column, DataError> {
    let name = column.name().to_string();
    let casted = column.cast(dtype).map_err(|_| DataError::ColumnWrongType {
        column_name: name.clone(),
        expected_type,
        found_type: column.dtype().to_string(),
    })?;
    // A non-strict cast turns unparsable entries into nulls.
    if casted.null_count() > column.null_count() {
        return Err(DataError::ColumnWrongType {
            column_name: name,
            expected_type,
            found_type: column.dtype().to_string(),
        });
    }
    Ok(casted)
}

/// Reads the phenotype table. `separator` is usually `b'\t'`.
pub fn load_phenotypes(path: &Path, separator: u8) -> Result<PhenotypeTable, DataError> {
    let df = if is_gzipped(path) {
        let mut bytes = Vec::new();
        MultiGzDecoder::new(File::open(path)?).read_to_end(&mut bytes)?;
        read_delimited(Cursor::new(bytes), separator)?
    } else {
        read_delimited(File::open(path)?, separator)?
    };

    let columns = df.get_columns();
    if columns.len() < 3 {
        return Err(DataError::TooFewColumns {
            path: path.display().to_string(),
            found: columns.len(),
        });
    }

    let iid = &columns[1];
    if iid.null_count() > 0 {
        return Err(DataError::MissingValuesFound(iid.name().to_string()));
    }
    let iid = column_as(iid, &DataType::Int64, "integer sample ID")?;
    let sample_ids: Vec<i64> = iid.i64()?.into_no_null_iter().collect();

    let mut trait_names = Vec::with_capacity(columns.len() - 2);
    let mut trait_columns = Vec::with_capacity(columns.len() - 2);
    for column in &columns[2..] {
        let casted = column_as(column, &DataType::Float64, "f64 (numeric)")?;
        trait_names.push(column.name().to_string());
        trait_columns.push(casted.f64()?.into_iter().collect::<Vec<Option<f64>>>());
    }

    log::info!(
        "Loaded {} traits for {} samples from '{}'.",
        trait_names.len(),
        sample_ids.len(),
        path.display()
    );
    PhenotypeTable::new(sample_ids, trait_names, trait_columns)
}

/// Reads `snp gene1 gene2 ...` lines; genes may be separated by whitespace or commas.
pub fn load_gene_map(path: &Path) -> Result<GeneMap, DataError> {
    let mut genes: AHashMap<String, Vec<String>> = AHashMap::new();
    for_each_record(path, |_, content| {
        let mut tokens = content
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty());
        if let Some(snp) = tokens.next() {
            genes
                .entry(snp.to_string())
                .or_default()
                .extend(tokens.map(str::to_string));
        }
        Ok(())
    })?;
    Ok(GeneMap { genes })
}

/// Reads a `row column weight` edge list over `n_nodes` features.
pub fn load_feature_graph(path: &Path, n_nodes: usize) -> Result<FeatureGraph, DataError> {
    let mut sources = Vec::new();
    let mut targets = Vec::new();
    let mut weights = Vec::new();
    for_each_record(path, |line, content| {
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() != 3 {
            return Err(malformed(
                path,
                line,
                format!("expected 'row column weight', found {} fields", tokens.len()),
            ));
        }
        sources.push(parse_token::<usize>(tokens[0], path, line, "a node index")?);
        targets.push(parse_token::<usize>(tokens[1], path, line, "a node index")?);
        weights.push(parse_token::<f64>(tokens[2], path, line, "a weight")?);
        Ok(())
    })?;
    log::info!("Loaded {} graph edges over {} features.", sources.len(), n_nodes);
    Ok(FeatureGraph::from_parts(n_nodes, sources, targets, weights)?)
}
