use ndarray::{Array1, Array2};

use crate::community::Partition;
use crate::config::GraphType;

/// Graph-theoretic measures on an undirected adjacency matrix.
///
/// Matrices passed in are symmetric with a zero diagonal and non-negative
/// entries; binary graphs hold only 0 and 1. Implementations are expected to
/// be deterministic. [`crate::NativeMetrics`] is the built-in implementation.
pub trait GraphMetrics {
    /// Number of neighbours per node.
    fn degree(&self, adj: &Array2<f64>) -> Array1<f64>;

    /// Sum of edge weights per node.
    fn strength(&self, adj: &Array2<f64>) -> Array1<f64>;

    fn clustering_coefficient(&self, adj: &Array2<f64>, kind: GraphType) -> Array1<f64>;

    fn local_efficiency(&self, adj: &Array2<f64>, kind: GraphType) -> Array1<f64>;

    fn betweenness_centrality(&self, adj: &Array2<f64>, kind: GraphType) -> Array1<f64>;

    fn eigenvector_centrality(&self, adj: &Array2<f64>) -> Array1<f64>;

    fn subgraph_centrality(&self, adj: &Array2<f64>) -> Array1<f64>;

    /// Community structure by modularity maximization.
    fn communities(&self, adj: &Array2<f64>) -> Partition;

    fn participation_coefficient(&self, adj: &Array2<f64>, modules: &[usize]) -> Array1<f64>;

    fn module_degree_zscore(&self, adj: &Array2<f64>, modules: &[usize]) -> Array1<f64>;

    /// Per node: the largest k whose k-core contains it, and the size of that core.
    fn kcoreness(&self, adj: &Array2<f64>) -> (Array1<f64>, Array1<f64>);

    /// Shortest path lengths, +inf for unreachable pairs. Weighted graphs use lengths `1/w`.
    fn distance_matrix(&self, adj: &Array2<f64>, kind: GraphType) -> Array2<f64>;

    fn transitivity(&self, adj: &Array2<f64>, kind: GraphType) -> f64;

    fn assortativity(&self, adj: &Array2<f64>, kind: GraphType) -> f64;
}
