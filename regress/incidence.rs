//! # Feature Graphs and Their Incidence Matrices
//!
//! A feature graph encodes prior belief that some SNPs act together (for example,
//! genomic neighbours). The network-constrained Lasso penalizes `beta^T L beta`, where
//! `L` is a degree-normalized Laplacian of this graph. Writing `L = D^T D` with the
//! incidence matrix `D` turns that penalty into a sum of squared residuals, which is
//! what allows an ordinary Lasso solver to handle it.
//!
//! `D` has one row per stored edge and one column per SNP. For an edge `(i, j)` with
//! weight `w`, column `i` holds `+sqrt(w / deg(i))` and column `j` holds
//! `-sqrt(w / deg(j))`. How `deg` is counted is selected by [`DegreeConvention`].

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, TriMat};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error(
        "Edge arrays have different lengths: {sources} sources, {targets} targets, {weights} weights."
    )]
    LengthMismatch {
        sources: usize,
        targets: usize,
        weights: usize,
    },
    #[error("Edge {edge} references node {node}, but the graph only has {n_nodes} nodes.")]
    NodeOutOfRange {
        edge: usize,
        node: usize,
        n_nodes: usize,
    },
    #[error("Edge {edge} has weight {weight}; weights must be finite and non-negative.")]
    InvalidWeight { edge: usize, weight: f64 },
    #[error(
        "Node {node} is an edge endpoint but has zero degree under the doubled row-count convention."
    )]
    ZeroDegree { node: usize },
}

/// How node degrees are counted when normalizing incidence entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegreeConvention {
    /// Number of stored, non-loop edges touching the node. Each edge counts once at each endpoint.
    #[default]
    IncidentEdges,
    /// Each stored entry adds 2 to the degree of its row endpoint only. Reproduces outputs
    /// of pipelines that assume a symmetric edge list where every edge is stored twice.
    DoubledRowCount,
}

/// A sparse, weighted relation over feature indices in coordinate form.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureGraph {
    n_nodes: usize,
    sources: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
}

impl FeatureGraph {
    /// Builds a graph from three parallel arrays, validating indices and weights.
    pub fn from_parts(
        n_nodes: usize,
        sources: Vec<usize>,
        targets: Vec<usize>,
        weights: Vec<f64>,
    ) -> Result<Self, GraphError> {
        if sources.len() != targets.len() || sources.len() != weights.len() {
            return Err(GraphError::LengthMismatch {
                sources: sources.len(),
                targets: targets.len(),
                weights: weights.len(),
            });
        }
        for (edge, ((&source, &target), &weight)) in
            sources.iter().zip(&targets).zip(&weights).enumerate()
        {
            for node in [source, target] {
                if node >= n_nodes {
                    return Err(GraphError::NodeOutOfRange {
                        edge,
                        node,
                        n_nodes,
                    });
                }
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(GraphError::InvalidWeight { edge, weight });
            }
        }
        Ok(Self {
            n_nodes,
            sources,
            targets,
            weights,
        })
    }

    /// A graph with nodes but no edges.
    pub fn empty(n_nodes: usize) -> Self {
        Self {
            n_nodes,
            sources: Vec::new(),
            targets: Vec::new(),
            weights: Vec::new(),
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of stored edges, self-loops included.
    pub fn n_edges(&self) -> usize {
        self.weights.len()
    }

    /// Iterates `(source, target, weight)` in storage order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.sources
            .iter()
            .zip(&self.targets)
            .zip(&self.weights)
            .map(|((&s, &t), &w)| (s, t, w))
    }

    /// Per-node degree under `convention`. Self-loops never contribute.
    pub fn degrees(&self, convention: DegreeConvention) -> Vec<f64> {
        let mut degrees = vec![0.0; self.n_nodes];
        for (source, target, _) in self.edges().filter(|(s, t, _)| s != t) {
            match convention {
                DegreeConvention::IncidentEdges => {
                    degrees[source] += 1.0;
                    degrees[target] += 1.0;
                }
                DegreeConvention::DoubledRowCount => degrees[source] += 2.0,
            }
        }
        degrees
    }
}

/// Sparse edge-by-feature incidence matrix, stored twice for row and column access.
#[derive(Debug, Clone)]
pub struct IncidenceMatrix {
    by_row: CsMat<f64>,
    by_column: CsMat<f64>,
}

impl IncidenceMatrix {
    /// Derives the incidence matrix of `graph`. Self-loops are skipped.
    pub fn from_graph(
        graph: &FeatureGraph,
        convention: DegreeConvention,
    ) -> Result<Self, GraphError> {
        let degrees = graph.degrees(convention);
        let n_loops = graph.edges().filter(|(s, t, _)| s == t).count();
        if n_loops > 0 {
            log::warn!("Skipping {n_loops} self-loop edge(s); they carry no coefficient difference.");
        }

        let n_rows = graph.n_edges() - n_loops;
        let mut triplets = TriMat::with_capacity((n_rows, graph.n_nodes()), 2 * n_rows);
        let mut row = 0;
        for (source, target, weight) in graph.edges().filter(|(s, t, _)| s != t) {
            let source_entry = normalized_entry(weight, degrees[source], source)?;
            let target_entry = normalized_entry(weight, degrees[target], target)?;
            triplets.add_triplet(row, source, source_entry);
            triplets.add_triplet(row, target, -target_entry);
            row += 1;
        }

        let by_row: CsMat<f64> = triplets.to_csr();
        let by_column = by_row.to_csc();
        log::info!(
            "Built {} x {} incidence matrix with {} nonzeros ({:?} degrees).",
            by_row.rows(),
            by_row.cols(),
            by_row.nnz(),
            convention
        );
        Ok(Self { by_row, by_column })
    }

    /// A zero-row incidence matrix: no graph constraint at all.
    pub fn empty(n_features: usize) -> Self {
        let by_row: CsMat<f64> = TriMat::new((0, n_features)).to_csr();
        let by_column = by_row.to_csc();
        Self { by_row, by_column }
    }

    pub fn n_edges(&self) -> usize {
        self.by_row.rows()
    }

    pub fn n_features(&self) -> usize {
        self.by_row.cols()
    }

    pub fn nnz(&self) -> usize {
        self.by_row.nnz()
    }

    /// Nonzero `(feature, value)` entries of one edge row.
    pub fn row(&self, edge: usize) -> Vec<(usize, f64)> {
        self.by_row
            .outer_view(edge)
            .map(|view| view.iter().map(|(j, &v)| (j, v)).collect())
            .unwrap_or_default()
    }

    /// Calls `visit(edge, value)` for each nonzero entry in one feature column.
    pub fn for_each_in_column<F: FnMut(usize, f64)>(&self, feature: usize, mut visit: F) {
        if let Some(view) = self.by_column.outer_view(feature) {
            for (edge, &value) in view.iter() {
                visit(edge, value);
            }
        }
    }

    /// Iterates `(edge, feature, value)` over all nonzeros in row-major order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.by_row
            .iter()
            .map(|(&value, (edge, feature))| (edge, feature, value))
    }

    /// The sparse Gram matrix `D^T D`, i.e. the normalized graph Laplacian.
    ///
    /// Holds at most `p + 2 * n_edges` nonzeros, so it is safe at genome scale.
    pub fn gram(&self) -> CsMat<f64> {
        let transposed = self.by_column.transpose_view();
        &transposed * &self.by_row
    }

    /// Dense copy of [`IncidenceMatrix::gram`].
    ///
    /// Allocates `p * p` values; intended for small graphs and closed-form checks.
    pub fn laplacian(&self) -> Array2<f64> {
        let p = self.n_features();
        let mut laplacian = Array2::zeros((p, p));
        for (&value, (a, b)) in self.gram().iter() {
            laplacian[[a, b]] += value;
        }
        laplacian
    }
}

fn normalized_entry(weight: f64, degree: f64, node: usize) -> Result<f64, GraphError> {
    if degree <= 0.0 {
        return Err(GraphError::ZeroDegree { node });
    }
    Ok((weight / degree).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn path_graph() -> FeatureGraph {
        // 0 - 1 - 2 with weights 1.0 and 4.0
        FeatureGraph::from_parts(3, vec![0, 1], vec![1, 2], vec![1.0, 4.0]).unwrap()
    }

    #[test]
    fn each_row_has_two_opposite_entries_at_its_endpoints() {
        let graph = path_graph();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        assert_eq!(incidence.n_edges(), 2);
        assert_eq!(incidence.n_features(), 3);
        assert_eq!(incidence.nnz(), 4);

        let degrees = graph.degrees(DegreeConvention::IncidentEdges);
        assert_eq!(degrees, vec![1.0, 2.0, 1.0]);

        for (edge, (source, target, weight)) in graph.edges().enumerate() {
            let row = incidence.row(edge);
            assert_eq!(row.len(), 2);
            let source_value = row.iter().find(|(j, _)| *j == source).unwrap().1;
            let target_value = row.iter().find(|(j, _)| *j == target).unwrap().1;
            assert!(source_value > 0.0);
            assert!(target_value < 0.0);
            assert_abs_diff_eq!(degrees[source] * source_value.powi(2), weight, epsilon = 1e-12);
            assert_abs_diff_eq!(degrees[target] * target_value.powi(2), weight, epsilon = 1e-12);
        }
    }

    #[test]
    fn doubled_row_count_matches_symmetric_storage() {
        // Each undirected edge stored in both directions.
        let graph =
            FeatureGraph::from_parts(3, vec![0, 1, 1, 2], vec![1, 0, 2, 1], vec![1.0; 4]).unwrap();
        let degrees = graph.degrees(DegreeConvention::DoubledRowCount);
        assert_eq!(degrees, vec![2.0, 4.0, 2.0]);
        let incidence =
            IncidenceMatrix::from_graph(&graph, DegreeConvention::DoubledRowCount).unwrap();
        assert_eq!(incidence.n_edges(), 4);
        let first = incidence.row(0);
        assert_abs_diff_eq!(first[0].1, (0.5f64).sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(first[1].1, -(0.25f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn doubled_row_count_rejects_column_only_endpoints() {
        let graph = FeatureGraph::from_parts(2, vec![0], vec![1], vec![1.0]).unwrap();
        assert!(matches!(
            IncidenceMatrix::from_graph(&graph, DegreeConvention::DoubledRowCount),
            Err(GraphError::ZeroDegree { node: 1 })
        ));
    }

    #[test]
    fn laplacian_is_gram_matrix_with_zero_row_sums_for_regular_graphs() {
        // A cycle is regular, so the normalized Laplacian annihilates the constant vector.
        let graph =
            FeatureGraph::from_parts(3, vec![0, 1, 2], vec![1, 2, 0], vec![2.0; 3]).unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        let laplacian = incidence.laplacian();
        for i in 0..3 {
            assert_abs_diff_eq!(laplacian[[i, i]], 2.0, epsilon = 1e-12);
            assert_abs_diff_eq!(laplacian.row(i).sum(), 0.0, epsilon = 1e-12);
            for j in 0..3 {
                assert_abs_diff_eq!(laplacian[[i, j]], laplacian[[j, i]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn sparse_gram_stays_proportional_to_edges() {
        // Chain over 200 features: tridiagonal Gram matrix.
        let p = 200;
        let graph =
            FeatureGraph::from_parts(p, (0..p - 1).collect(), (1..p).collect(), vec![1.5; p - 1])
                .unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        let gram = incidence.gram();
        assert_eq!(gram.shape(), (p, p));
        assert_eq!(gram.nnz(), p + 2 * (p - 1));
        let dense = incidence.laplacian();
        for (&value, (a, b)) in gram.iter() {
            assert!(a.abs_diff(b) <= 1);
            assert_abs_diff_eq!(dense[[a, b]], value, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(dense.sum(), gram.data().iter().sum::<f64>(), epsilon = 1e-9);
    }

    #[test]
    fn triplets_walk_rows_in_order() {
        let incidence =
            IncidenceMatrix::from_graph(&path_graph(), DegreeConvention::IncidentEdges).unwrap();
        let triplets: Vec<_> = incidence.triplets().collect();
        assert_eq!(triplets.len(), incidence.nnz());
        for edge in 0..incidence.n_edges() {
            let from_triplets: Vec<(usize, f64)> = triplets
                .iter()
                .filter(|&&(e, _, _)| e == edge)
                .map(|&(_, j, v)| (j, v))
                .collect();
            assert_eq!(from_triplets, incidence.row(edge));
        }
        assert!(triplets.windows(2).all(|w| (w[0].0, w[0].1) < (w[1].0, w[1].1)));
    }

    #[test]
    fn self_loops_are_skipped() {
        let graph = FeatureGraph::from_parts(3, vec![0, 1], vec![0, 2], vec![1.0, 1.0]).unwrap();
        let incidence = IncidenceMatrix::from_graph(&graph, DegreeConvention::IncidentEdges).unwrap();
        assert_eq!(incidence.n_edges(), 1);
        assert_eq!(incidence.row(0), vec![(1, 1.0), (2, -1.0)]);
    }

    #[test]
    fn column_access_matches_rows() {
        let incidence =
            IncidenceMatrix::from_graph(&path_graph(), DegreeConvention::IncidentEdges).unwrap();
        let mut middle = Vec::new();
        incidence.for_each_in_column(1, |edge, value| middle.push((edge, value)));
        assert_eq!(middle.len(), 2);
        let from_triplets: Vec<_> = incidence.triplets().filter(|&(_, j, _)| j == 1).collect();
        assert_eq!(from_triplets.len(), 2);
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        assert!(matches!(
            FeatureGraph::from_parts(2, vec![0], vec![2], vec![1.0]),
            Err(GraphError::NodeOutOfRange { node: 2, .. })
        ));
        assert!(matches!(
            FeatureGraph::from_parts(2, vec![0], vec![1], vec![-1.0]),
            Err(GraphError::InvalidWeight { edge: 0, .. })
        ));
        assert!(matches!(
            FeatureGraph::from_parts(2, vec![0, 1], vec![1], vec![1.0]),
            Err(GraphError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn empty_incidence_has_no_rows() {
        let incidence = IncidenceMatrix::empty(5);
        assert_eq!(incidence.n_edges(), 0);
        assert_eq!(incidence.n_features(), 5);
        assert!(incidence.laplacian().iter().all(|&v| v == 0.0));
        let empty = IncidenceMatrix::from_graph(&FeatureGraph::empty(5), DegreeConvention::IncidentEdges)
            .unwrap();
        assert_eq!(empty.n_edges(), 0);
    }
}
