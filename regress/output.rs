//! Tab-separated result tables. Paths ending in `.gz` are gzip-compressed.

use crate::association::AssociationScan;
use crate::data::GeneMap;
use crate::incidence::IncidenceMatrix;
use crate::model::TrainedModel;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use ndarray::ArrayView1;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write output file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to write TSV record: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Cannot write {values} values for {labels} labels.")]
    LengthMismatch { labels: usize, values: usize },
}

fn create_writer(path: &Path) -> Result<csv::Writer<Box<dyn Write>>, OutputError> {
    let file = BufWriter::new(File::create(path)?);
    let sink: Box<dyn Write> = if path.extension().and_then(|ext| ext.to_str()) == Some("gz") {
        Box::new(GzEncoder::new(file, Compression::default()))
    } else {
        Box::new(file)
    };
    Ok(WriterBuilder::new().delimiter(b'\t').from_writer(sink))
}

fn write_rows<T: Serialize>(path: &Path, rows: impl IntoIterator<Item = T>) -> Result<(), OutputError> {
    let mut writer = create_writer(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn check_lengths(labels: usize, values: usize) -> Result<(), OutputError> {
    if labels != values {
        return Err(OutputError::LengthMismatch { labels, values });
    }
    Ok(())
}

#[derive(Serialize)]
struct AssociationRow<'a> {
    index: usize,
    snp: &'a str,
    beta: f64,
    std_error: f64,
    t_statistic: f64,
    p_value: f64,
}

/// One row per SNP: slope, standard error, t statistic and p-value.
pub fn write_association(
    path: &Path,
    scan: &AssociationScan,
    snp_names: &[String],
) -> Result<(), OutputError> {
    check_lengths(snp_names.len(), scan.results.len())?;
    write_rows(
        path,
        scan.results.iter().map(|r| AssociationRow {
            index: r.snp_index,
            snp: &snp_names[r.snp_index],
            beta: r.beta,
            std_error: r.std_error,
            t_statistic: r.t_statistic,
            p_value: r.p_value,
        }),
    )
}

#[derive(Serialize)]
struct ScatterRow<'a> {
    index: usize,
    snp: &'a str,
    neg_log10_p: f64,
    significant: bool,
}

/// The data behind a thresholded `-log10 p` scatter plot, one point per SNP.
pub fn write_scatter(
    path: &Path,
    scan: &AssociationScan,
    snp_names: &[String],
) -> Result<(), OutputError> {
    check_lengths(snp_names.len(), scan.results.len())?;
    write_rows(
        path,
        scan.results.iter().map(|r| ScatterRow {
            index: r.snp_index,
            snp: &snp_names[r.snp_index],
            neg_log10_p: r.neg_log10_p(),
            significant: scan.is_significant(r),
        }),
    )
}

#[derive(Serialize)]
struct CoefficientRow<'a> {
    snp: &'a str,
    coefficient: f64,
    genes: String,
}

/// Every SNP with its coefficient; genes are `;`-joined when a map is given.
pub fn write_coefficients(
    path: &Path,
    model: &TrainedModel,
    genes: Option<&GeneMap>,
) -> Result<(), OutputError> {
    check_lengths(model.snp_names.len(), model.coefficients.len())?;
    write_rows(
        path,
        model
            .snp_names
            .iter()
            .zip(&model.coefficients)
            .map(|(snp, &coefficient)| CoefficientRow {
                snp,
                coefficient,
                genes: genes.map(|g| g.genes_for(snp).join(";")).unwrap_or_default(),
            }),
    )
}

#[derive(Serialize)]
struct PredictionRow {
    sample_id: i64,
    prediction: f64,
}

pub fn write_predictions(
    path: &Path,
    sample_ids: &[i64],
    predictions: ArrayView1<f64>,
) -> Result<(), OutputError> {
    check_lengths(sample_ids.len(), predictions.len())?;
    write_rows(
        path,
        sample_ids
            .iter()
            .zip(predictions.iter())
            .map(|(&sample_id, &prediction)| PredictionRow {
                sample_id,
                prediction,
            }),
    )
}

#[derive(Serialize)]
struct IncidenceRow {
    edge: usize,
    feature: usize,
    value: f64,
}

/// Nonzero entries of the incidence matrix in coordinate form.
pub fn write_incidence(path: &Path, incidence: &IncidenceMatrix) -> Result<(), OutputError> {
    write_rows(
        path,
        incidence
            .triplets()
            .map(|(edge, feature, value)| IncidenceRow {
                edge,
                feature,
                value,
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::{AssociationResult, bonferroni_threshold};
    use crate::incidence::{DegreeConvention, FeatureGraph};
    use flate2::read::MultiGzDecoder;
    use ndarray::array;
    use std::fs;
    use std::io::Read;
    use tempfile::Builder;

    fn scan() -> AssociationScan {
        let result = |snp_index, p_value| AssociationResult {
            snp_index,
            beta: 1.0,
            std_error: 0.5,
            t_statistic: 2.0,
            p_value,
        };
        AssociationScan {
            results: vec![result(0, 1e-9), result(1, 0.5)],
            threshold: bonferroni_threshold(2),
        }
    }

    #[test]
    fn scatter_table_flags_significant_snps() {
        let file = Builder::new().suffix(".tsv").tempfile().unwrap();
        let names = vec!["rs1".to_string(), "rs2".to_string()];
        write_scatter(file.path(), &scan(), &names).unwrap();
        let text = fs::read_to_string(file.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "index\tsnp\tneg_log10_p\tsignificant");
        let first: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(&first[..2], &["0", "rs1"]);
        assert!((first[2].parse::<f64>().unwrap() - 9.0).abs() < 1e-9);
        assert_eq!(first[3], "true");
        assert!(lines[2].ends_with("\tfalse"));
    }

    #[test]
    fn label_count_must_match() {
        let file = Builder::new().suffix(".tsv").tempfile().unwrap();
        assert!(matches!(
            write_association(file.path(), &scan(), &["only".to_string()]),
            Err(OutputError::LengthMismatch {
                labels: 1,
                values: 2
            })
        ));
        assert!(write_predictions(file.path(), &[1, 2, 3], array![0.5].view()).is_err());
    }

    #[test]
    fn gzipped_incidence_triplets() {
        let graph = FeatureGraph::from_parts(3, vec![0], vec![2], vec![4.0]).unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        let file = Builder::new().suffix(".tsv.gz").tempfile().unwrap();
        write_incidence(file.path(), &incidence).unwrap();

        let mut text = String::new();
        MultiGzDecoder::new(fs::File::open(file.path()).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "edge\tfeature\tvalue\n0\t0\t2.0\n0\t2\t-2.0\n");
    }
}
