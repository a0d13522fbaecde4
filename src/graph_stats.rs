//! Nodal and global graph statistics of thresholded graphs.
//!
//! Statistics are computed through a [`GraphMetrics`] implementation. On
//! disconnected graphs, unreachable node pairs add nothing to global
//! efficiency and are left out of the characteristic path length and of
//! eccentricity, so an isolated node has eccentricity 0.

use std::fmt;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::GraphType;
use crate::error::{NeurographError, Result};
use crate::paths::char_path;
use crate::threshold::{count_edges, GraphMatrix, GraphNotes};
use crate::traits::GraphMetrics;
use crate::util::{nullable, read_json, write_json};

/// Per-node statistics, one entry per ROI in every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodalStats {
    #[serde(with = "nullable::vector")]
    pub degree: Vec<f64>,
    /// Only computed for weighted graphs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<Vec<f64>>,
    #[serde(with = "nullable::vector")]
    pub clustering_coef: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub local_efficiency: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub betweenness: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub eigenvector_centrality: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub subgraph_centrality: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub participation_coef: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub module_degree_zscore: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub kcoreness: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub kcore_size: Vec<f64>,
    #[serde(with = "nullable::vector")]
    pub eccentricity: Vec<f64>,
    /// Community index per node. Labels are not comparable across graphs.
    pub module: Vec<usize>,
}

impl NodalStats {
    /// Named numeric columns, in a fixed order. Module labels are not included.
    pub fn columns(&self) -> Vec<(&'static str, &[f64])> {
        let mut cols: Vec<(&'static str, &[f64])> = vec![("degree", &self.degree[..])];
        if let Some(strength) = &self.strength {
            cols.push(("strength", &strength[..]));
        }
        cols.extend_from_slice(&[
            ("clustering_coef", &self.clustering_coef[..]),
            ("local_efficiency", &self.local_efficiency[..]),
            ("betweenness", &self.betweenness[..]),
            ("eigenvector_centrality", &self.eigenvector_centrality[..]),
            ("subgraph_centrality", &self.subgraph_centrality[..]),
            ("participation_coef", &self.participation_coef[..]),
            ("module_degree_zscore", &self.module_degree_zscore[..]),
            ("kcoreness", &self.kcoreness[..]),
            ("kcore_size", &self.kcore_size[..]),
            ("eccentricity", &self.eccentricity[..]),
        ]);
        cols
    }
}

/// Whole-graph statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub num_nodes: usize,
    /// Undirected edges, i.e. nonzero upper-triangle entries.
    pub num_edges: usize,
    #[serde(with = "nullable::scalar")]
    pub density: f64,
    #[serde(with = "nullable::scalar")]
    pub transitivity: f64,
    #[serde(with = "nullable::scalar")]
    pub global_efficiency: f64,
    /// NaN when no pair of nodes is connected.
    #[serde(with = "nullable::scalar")]
    pub char_path_length: f64,
    /// NaN when all edges join nodes of equal degree (or strength).
    #[serde(with = "nullable::scalar")]
    pub assortativity: f64,
    #[serde(with = "nullable::scalar")]
    pub modularity: f64,
    #[serde(with = "nullable::scalar")]
    pub radius: f64,
    #[serde(with = "nullable::scalar")]
    pub diameter: f64,
}

impl GlobalStats {
    pub fn columns(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("num_nodes", self.num_nodes as f64),
            ("num_edges", self.num_edges as f64),
            ("density", self.density),
            ("transitivity", self.transitivity),
            ("global_efficiency", self.global_efficiency),
            ("char_path_length", self.char_path_length),
            ("assortativity", self.assortativity),
            ("modularity", self.modularity),
            ("radius", self.radius),
            ("diameter", self.diameter),
        ]
    }
}

/// The statistics of one graph together with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStatsRecord {
    pub notes: GraphNotes,
    pub roi_names: Vec<String>,
    pub xyz: Vec<[f32; 3]>,
    /// Whether weights were scaled to a maximum of 1. `None` for binary graphs.
    pub normalized: Option<bool>,
    pub nodal: NodalStats,
    pub global: GlobalStats,
}

impl GraphStatsRecord {
    pub fn subject(&self) -> &str {
        &self.notes.conn.subject
    }

    pub fn graph_type(&self) -> GraphType {
        GraphType::from_binarize(self.notes.binarize)
    }

    /// Read a statistics record from a JSON file (".gz" aware).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<GraphStatsRecord> {
        let record: GraphStatsRecord = read_json(path)?;
        let n = record.roi_names.len();
        if let Some((name, col)) = record.nodal.columns().into_iter().find(|(_, c)| c.len() != n) {
            return Err(NeurographError::DimensionMismatch {
                context: format!("nodal statistic '{}' vs. ROI names", name),
                expected: n,
                got: col.len(),
            });
        }
        Ok(record)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json(path, self)
    }
}

impl fmt::Display for GraphStatsRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Graph statistics of subject '{}' ({} graph, {} nodes, {} edges, Q={:.3}).",
            self.subject(),
            self.graph_type(),
            self.global.num_nodes,
            self.global.num_edges,
            self.global.modularity
        )
    }
}

/// Prepare the matrix the measures run on: edge magnitudes for weighted graphs,
/// optionally scaled to a maximum of 1, and a 0/1 mask for binary graphs.
pub fn prepare_adjacency(adj: &Array2<f64>, kind: GraphType, normalize: bool) -> Array2<f64> {
    match kind {
        GraphType::Binary => adj.mapv(|x| if x != 0.0 { 1.0 } else { 0.0 }),
        GraphType::Weighted => {
            let mag = adj.mapv(f64::abs);
            let max = mag.fold(0.0f64, |acc, &x| acc.max(x));
            if normalize && max > 0.0 {
                mag / max
            } else {
                mag
            }
        }
    }
}

/// Compute all nodal and global statistics of one graph.
///
/// `normalize` only affects weighted graphs.
///
/// # Examples
///
/// ```no_run
/// use neurograph::{compute_graph_stats, GraphMatrix, NativeMetrics};
///
/// let graph = GraphMatrix::from_file("/path/to/graphs_sub-01_corr_aal_proportional_wei_0.10.json").unwrap();
/// let stats = compute_graph_stats(&graph, &NativeMetrics, true).unwrap();
/// println!("{}", stats);
/// ```
#[instrument(skip_all, fields(subject = %graph.notes.conn.subject, weight = graph.notes.thresh_weight))]
pub fn compute_graph_stats<M: GraphMetrics + ?Sized>(
    graph: &GraphMatrix,
    metrics: &M,
    normalize: bool,
) -> Result<GraphStatsRecord> {
    let n = graph.roi_names.len();
    let (rows, cols) = graph.adjacency.dim();
    if rows != n || cols != n {
        return Err(NeurographError::DimensionMismatch {
            context: String::from("adjacency matrix vs. ROI names"),
            expected: n,
            got: if rows != n { rows } else { cols },
        });
    }

    let kind = graph.graph_type();
    let adj = prepare_adjacency(&graph.adjacency, kind, normalize);

    let partition = metrics.communities(&adj);
    let participation = metrics.participation_coefficient(&adj, &partition.modules);
    let zscore = metrics.module_degree_zscore(&adj, &partition.modules);
    let (kcoreness, kcore_size) = metrics.kcoreness(&adj);
    let distances = metrics.distance_matrix(&adj, kind);
    let paths = char_path(&distances);

    let nodal = NodalStats {
        degree: metrics.degree(&adj).to_vec(),
        strength: match kind {
            GraphType::Weighted => Some(metrics.strength(&adj).to_vec()),
            GraphType::Binary => None,
        },
        clustering_coef: metrics.clustering_coefficient(&adj, kind).to_vec(),
        local_efficiency: metrics.local_efficiency(&adj, kind).to_vec(),
        betweenness: metrics.betweenness_centrality(&adj, kind).to_vec(),
        eigenvector_centrality: metrics.eigenvector_centrality(&adj).to_vec(),
        subgraph_centrality: metrics.subgraph_centrality(&adj).to_vec(),
        participation_coef: participation.to_vec(),
        module_degree_zscore: zscore.to_vec(),
        kcoreness: kcoreness.to_vec(),
        kcore_size: kcore_size.to_vec(),
        eccentricity: paths.eccentricity.to_vec(),
        module: partition.modules.clone(),
    };

    let num_edges = count_edges(&adj);
    let pairs = (n * n.saturating_sub(1)) as f64 / 2.0;
    let global = GlobalStats {
        num_nodes: n,
        num_edges,
        density: if pairs > 0.0 { num_edges as f64 / pairs } else { f64::NAN },
        transitivity: metrics.transitivity(&adj, kind),
        global_efficiency: paths.global_efficiency,
        char_path_length: paths.char_path_length,
        assortativity: metrics.assortativity(&adj, kind),
        modularity: partition.q,
        radius: paths.radius,
        diameter: paths.diameter,
    };
    debug!(edges = num_edges, modules = partition.n_modules(), "computed graph statistics");

    Ok(GraphStatsRecord {
        notes: graph.notes.clone(),
        roi_names: graph.roi_names.clone(),
        xyz: graph.xyz.clone(),
        normalized: match kind {
            GraphType::Weighted => Some(normalize),
            GraphType::Binary => None,
        },
        nodal,
        global,
    })
}
