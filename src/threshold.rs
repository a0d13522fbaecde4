//! Thresholding of connectivity matrices into graphs.
//!
//! Each threshold weight produces an independent adjacency matrix. The steps
//! run in a fixed order: threshold, discard negative edges, binarize, autofix.

use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::{validate_weight, validate_weights, GraphType, ThreshType};
use crate::connectivity::{ConnNotes, ConnectivityMatrix};
use crate::error::{NeurographError, Result};
use crate::util::{nullable, read_json, write_json};

/// How to threshold one connectivity matrix, and at which weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdParams {
    pub thresh_type: ThreshType,
    pub weights: Vec<f64>,
    pub binarize: bool,
    pub neg_discard: bool,
}

impl ThresholdParams {
    pub fn graph_type(&self) -> GraphType {
        GraphType::from_binarize(self.binarize)
    }
}

/// Provenance of a graph: the connectivity notes plus the thresholding applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNotes {
    pub conn: ConnNotes,
    pub thresh_type: ThreshType,
    pub thresh_weight: f64,
    pub binarize: bool,
    pub neg_discard: bool,
}

/// An adjacency matrix: symmetric, zero diagonal, finite entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMatrix {
    pub notes: GraphNotes,
    pub roi_names: Vec<String>,
    pub xyz: Vec<[f32; 3]>,
    #[serde(with = "nullable::matrix")]
    pub adjacency: Array2<f64>,
}

impl GraphMatrix {
    pub fn graph_type(&self) -> GraphType {
        GraphType::from_binarize(self.notes.binarize)
    }

    pub fn n_nodes(&self) -> usize {
        self.adjacency.nrows()
    }

    /// Read a graph record from a JSON file (".gz" aware).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<GraphMatrix> {
        let graph: GraphMatrix = read_json(path)?;
        if graph.adjacency.dim() != (graph.roi_names.len(), graph.roi_names.len()) {
            return Err(NeurographError::DimensionMismatch {
                context: String::from("adjacency matrix vs. ROI names"),
                expected: graph.roi_names.len(),
                got: graph.adjacency.nrows(),
            });
        }
        Ok(graph)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path, self)
    }
}

impl fmt::Display for GraphMatrix {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} graph of subject '{}' at {} {:.2} with {} nodes.",
            self.graph_type(),
            self.notes.conn.conn_type,
            self.notes.conn.subject,
            self.notes.thresh_type,
            self.notes.thresh_weight,
            self.n_nodes()
        )
    }
}

/// Threshold a connectivity matrix at every weight in `params`.
///
/// # Examples
///
/// ```no_run
/// use neurograph::{threshold_graphs, ConnectivityMatrix, ThreshType, ThresholdParams};
///
/// let conn = ConnectivityMatrix::from_file("/path/to/conn_mat_corr_aal_rest_sub-01.json").unwrap();
/// let params = ThresholdParams {
///     thresh_type: ThreshType::Proportional,
///     weights: vec![0.1, 0.2],
///     binarize: true,
///     neg_discard: true,
/// };
/// let graphs = threshold_graphs(&conn, &params).unwrap();
/// assert_eq!(2, graphs.len());
/// ```
pub fn threshold_graphs(conn: &ConnectivityMatrix, params: &ThresholdParams) -> Result<Vec<GraphMatrix>> {
    validate_weights(params.thresh_type, &params.weights)?;
    params
        .weights
        .iter()
        .map(|&w| threshold_graph(conn, params, w))
        .collect()
}

/// Threshold a connectivity matrix at a single weight.
#[instrument(skip_all, fields(subject = %conn.notes.subject, weight = weight))]
pub fn threshold_graph(conn: &ConnectivityMatrix, params: &ThresholdParams, weight: f64) -> Result<GraphMatrix> {
    validate_weight(params.thresh_type, weight)?;

    let mut adj = match params.thresh_type {
        ThreshType::Proportional => threshold_proportional(&conn.matrix, weight),
        ThreshType::Absolute => threshold_absolute(&conn.matrix, weight),
    };
    if params.neg_discard {
        discard_negative(&mut adj);
    }
    if params.binarize {
        binarize(&mut adj);
    }
    autofix(&mut adj, params.binarize);
    debug!(edges = count_edges(&adj), "graph thresholded");

    Ok(GraphMatrix {
        notes: GraphNotes {
            conn: conn.notes.clone(),
            thresh_type: params.thresh_type,
            thresh_weight: weight,
            binarize: params.binarize,
            neg_discard: params.neg_discard,
        },
        roi_names: conn.roi_names.clone(),
        xyz: conn.xyz.clone(),
        adjacency: adj,
    })
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn is_symmetric(w: &Array2<f64>) -> bool {
    let n = w.nrows();
    (0..n).all(|i| (i + 1..n).all(|j| w[[i, j]] == w[[j, i]]))
}

/// Keep the `p` fraction of strongest-magnitude off-diagonal entries.
///
/// For a symmetric input only the upper triangle is ranked and the result is
/// mirrored, so `round(p · N(N-1) / 2)` edges survive. Otherwise all
/// off-diagonal entries are ranked and `round(p · N(N-1))` survive. Only
/// nonzero entries are candidates. Ties are broken by row-major index order.
/// Non-finite entries are treated as 0.
pub fn threshold_proportional(w: &Array2<f64>, p: f64) -> Array2<f64> {
    let n = w.nrows();
    let mut src = w.mapv(finite_or_zero);
    for i in 0..n {
        src[[i, i]] = 0.0;
    }
    let symmetric = is_symmetric(&src);

    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for i in 0..n {
        let start = if symmetric { i + 1 } else { 0 };
        for j in start..n {
            if i != j && src[[i, j]] != 0.0 {
                candidates.push((i, j, src[[i, j]]));
            }
        }
    }
    // Stable sort: equal magnitudes keep their row-major order.
    candidates.sort_by(|a, b| b.2.abs().partial_cmp(&a.2.abs()).unwrap_or(Ordering::Equal));

    let slots = if symmetric { n * n.saturating_sub(1) / 2 } else { n * n.saturating_sub(1) };
    let keep = ((slots as f64) * p).round() as usize;

    let mut out = Array2::<f64>::zeros((n, n));
    for &(i, j, v) in candidates.iter().take(keep) {
        out[[i, j]] = v;
        if symmetric {
            out[[j, i]] = v;
        }
    }
    out
}

/// Keep entries whose magnitude is at least `thr`. The diagonal and non-finite entries become 0.
pub fn threshold_absolute(w: &Array2<f64>, thr: f64) -> Array2<f64> {
    let mut out = w.mapv(|x| if x.is_finite() && x.abs() >= thr { x } else { 0.0 });
    for i in 0..out.nrows() {
        out[[i, i]] = 0.0;
    }
    out
}

/// Zero all negative entries.
pub fn discard_negative(w: &mut Array2<f64>) {
    w.mapv_inplace(|x| if x < 0.0 { 0.0 } else { x });
}

/// Set all nonzero entries to 1.
pub fn binarize(w: &mut Array2<f64>) {
    w.mapv_inplace(|x| if x != 0.0 && !x.is_nan() { 1.0 } else { 0.0 });
}

/// Make an adjacency matrix well-formed: NaN/Inf become 0, the diagonal is zeroed and the
/// matrix is made symmetric. Weighted matrices are averaged with their transpose; binary
/// matrices take the logical OR with their transpose so values stay in {0, 1}.
pub fn autofix(w: &mut Array2<f64>, binary: bool) {
    let n = w.nrows();
    w.mapv_inplace(finite_or_zero);
    for i in 0..n {
        w[[i, i]] = 0.0;
        for j in i + 1..n {
            let (a, b) = (w[[i, j]], w[[j, i]]);
            let v = if binary {
                if a != 0.0 || b != 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                0.5 * (a + b)
            };
            w[[i, j]] = v;
            w[[j, i]] = v;
        }
    }
}

/// Number of undirected edges (nonzero upper-triangle entries).
pub fn count_edges(w: &Array2<f64>) -> usize {
    let n = w.nrows();
    (0..n).map(|i| (i + 1..n).filter(|&j| w[[i, j]] != 0.0).count()).sum()
}


#[cfg(test)]
mod test {
    use super::*;
    use ndarray::array;

    fn conn(matrix: Array2<f64>) -> ConnectivityMatrix {
        let n = matrix.nrows();
        ConnectivityMatrix {
            notes: ConnNotes {
                conn_type: crate::config::ConnType::Corr,
                atlas: String::from("aal"),
                atlases: vec![String::from("aal")],
                condition: String::from("rest"),
                subject: String::from("sub-01"),
                n_timepoints: 100,
                provenance: vec![],
            },
            roi_names: (0..n).map(|i| format!("r{}", i)).collect(),
            xyz: vec![[0.0; 3]; n],
            pvalues: Array2::zeros((n, n)),
            matrix,
        }
    }

    // Symmetric matrix with distinct off-diagonal magnitudes and mixed signs.
    fn distinct(n: usize) -> Array2<f64> {
        let mut w = Array2::<f64>::eye(n);
        let mut k = 1.0;
        for i in 0..n {
            for j in i + 1..n {
                let v = k / 1000.0 * if (i + j) % 3 == 0 { -1.0 } else { 1.0 };
                w[[i, j]] = v;
                w[[j, i]] = v;
                k += 1.0;
            }
        }
        w
    }

    fn off_diagonal_nonzeros(w: &Array2<f64>) -> usize {
        let n = w.nrows();
        (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).filter(|&(i, j)| i != j && w[[i, j]] != 0.0).count()
    }

    #[test]
    fn scenario_absolute_negdiscard_binarize() {
        let c = conn(array![[1.0, 0.5, 0.2], [0.5, 1.0, -0.3], [0.2, -0.3, 1.0]]);
        let params = ThresholdParams {
            thresh_type: ThreshType::Absolute,
            weights: vec![0.3],
            binarize: true,
            neg_discard: true,
        };
        let graphs = threshold_graphs(&c, &params).unwrap();
        assert_eq!(1, graphs.len());
        assert_eq!(array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]], graphs[0].adjacency);
        assert_eq!(GraphType::Binary, graphs[0].graph_type());
    }

    #[test]
    fn proportional_keeps_the_expected_number_of_edges() {
        let n = 10;
        let w = distinct(n);
        for &p in &[0.1, 0.2, 0.5, 1.0] {
            let out = threshold_proportional(&w, p);
            let expected = 2 * ((p * (n * (n - 1)) as f64 / 2.0).round() as usize);
            assert_eq!(expected, off_diagonal_nonzeros(&out), "p = {}", p);
        }
    }

    #[test]
    fn proportional_keeps_the_strongest_magnitudes() {
        let w = array![[0.0, 0.9, -0.8, 0.1], [0.9, 0.0, 0.2, 0.3], [-0.8, 0.2, 0.0, 0.05], [0.1, 0.3, 0.05, 0.0]];
        // 6 upper entries, p = 0.5 keeps 3: 0.9, -0.8, 0.3.
        let out = threshold_proportional(&w, 0.5);
        assert_eq!(0.9, out[[0, 1]]);
        assert_eq!(-0.8, out[[2, 0]]);
        assert_eq!(0.3, out[[3, 1]]);
        assert_eq!(0.0, out[[1, 2]]);
        assert_eq!(6, off_diagonal_nonzeros(&out));
    }

    #[test]
    fn proportional_ties_follow_index_order() {
        let mut w = Array2::<f64>::ones((4, 4));
        for i in 0..4 {
            w[[i, i]] = 0.0;
        }
        // 6 tied upper entries, keep round(6 * 0.34) = 2: (0,1) and (0,2).
        let out = threshold_proportional(&w, 0.34);
        assert_eq!(1.0, out[[0, 1]]);
        assert_eq!(1.0, out[[0, 2]]);
        assert_eq!(0.0, out[[0, 3]]);
        assert_eq!(0.0, out[[1, 2]]);
    }

    #[test]
    fn absolute_threshold_splits_by_magnitude() {
        let w = distinct(8);
        let thr = 0.012;
        let out = threshold_absolute(&w, thr);
        for i in 0..8 {
            for j in 0..8 {
                if i == j {
                    continue;
                }
                if out[[i, j]] != 0.0 {
                    assert!(out[[i, j]].abs() >= thr);
                } else {
                    assert!(w[[i, j]].abs() < thr);
                }
            }
        }
    }

    #[test]
    fn binarized_mask_matches_thresholded_mask() {
        let c = conn(distinct(9));
        let weighted = ThresholdParams {
            thresh_type: ThreshType::Proportional,
            weights: vec![0.3],
            binarize: false,
            neg_discard: false,
        };
        let binary = ThresholdParams { binarize: true, ..weighted.clone() };
        let w = &threshold_graphs(&c, &weighted).unwrap()[0].adjacency;
        let b = &threshold_graphs(&c, &binary).unwrap()[0].adjacency;
        for (x, y) in w.iter().zip(b.iter()) {
            assert!(*y == 0.0 || *y == 1.0);
            assert_eq!(*x != 0.0, *y == 1.0);
        }
    }

    #[test]
    fn negative_discard_leaves_no_negative_entries() {
        let c = conn(distinct(9));
        let params = ThresholdParams {
            thresh_type: ThreshType::Absolute,
            weights: vec![0.0, 0.01],
            binarize: false,
            neg_discard: true,
        };
        for g in threshold_graphs(&c, &params).unwrap() {
            assert!(g.adjacency.iter().all(|&x| x >= 0.0));
        }
    }

    #[test]
    fn autofix_makes_matrices_symmetric_with_zero_diagonal() {
        let mut w = array![[1.0, 0.4, f64::NAN], [0.2, 5.0, f64::INFINITY], [0.0, 0.6, 1.0]];
        autofix(&mut w, false);
        assert_eq!(w, w.t());
        assert!((0..3).all(|i| w[[i, i]] == 0.0));
        assert!((0.3 - w[[0, 1]]).abs() < 1e-12);
        assert_eq!(0.0, w[[0, 2]]);
        assert_eq!(0.3, w[[1, 2]]);

        let mut b = array![[0.0, 1.0], [0.0, 0.0]];
        autofix(&mut b, true);
        assert_eq!(array![[0.0, 1.0], [1.0, 0.0]], b);
    }

    #[test]
    fn weights_are_independent_and_repeatable() {
        let c = conn(distinct(12));
        let params = ThresholdParams {
            thresh_type: ThreshType::Proportional,
            weights: vec![0.3, 0.1, 0.3],
            binarize: false,
            neg_discard: true,
        };
        let graphs = threshold_graphs(&c, &params).unwrap();
        assert_eq!(graphs[0].adjacency, graphs[2].adjacency);
        let single = threshold_graph(&c, &params, 0.1).unwrap();
        assert_eq!(single.adjacency, graphs[1].adjacency);
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let c = conn(distinct(4));
        let params = ThresholdParams {
            thresh_type: ThreshType::Proportional,
            weights: vec![1.2],
            binarize: false,
            neg_discard: false,
        };
        assert!(matches!(threshold_graphs(&c, &params), Err(NeurographError::InvalidConfig { .. })));
    }
}
