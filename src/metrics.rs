//! The built-in graph measure implementation.

use ndarray::{Array1, Array2, Axis};

use crate::community::{self, Partition};
use crate::config::GraphType;
use crate::linalg::symmetric_eigen;
use crate::paths;
use crate::traits::GraphMetrics;

/// Native implementation of [`GraphMetrics`], following the Brain Connectivity
/// Toolbox definitions for undirected graphs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMetrics;

fn cube_root(w: &Array2<f64>) -> Array2<f64> {
    w.mapv(f64::cbrt)
}

// diag(C^3) for symmetric C.
fn cycles3(c: &Array2<f64>) -> Array1<f64> {
    let c2 = c.dot(c);
    (&c2 * c).sum_axis(Axis(1))
}

fn degrees(adj: &Array2<f64>) -> Array1<f64> {
    adj.map_axis(Axis(1), |row| row.iter().filter(|&&x| x != 0.0).count() as f64)
}

/// Largest k for which each node belongs to the k-core, and the size of that core.
pub fn kcore(adj: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = adj.nrows();
    let bin = adj.mapv(|x| if x != 0.0 { 1.0 } else { 0.0 });
    let mut coreness = Array1::<f64>::zeros(n);
    let mut core_size = Array1::<f64>::zeros(n);
    for k in 1..n {
        let mut alive = vec![true; n];
        loop {
            let mut removed = false;
            for i in 0..n {
                if !alive[i] {
                    continue;
                }
                let deg = (0..n).filter(|&j| alive[j] && bin[[i, j]] != 0.0).count();
                if deg < k {
                    alive[i] = false;
                    removed = true;
                }
            }
            if !removed {
                break;
            }
        }
        let size = alive.iter().filter(|&&a| a).count();
        if size == 0 {
            break;
        }
        for i in (0..n).filter(|&i| alive[i]) {
            coreness[i] = k as f64;
            core_size[i] = size as f64;
        }
    }
    (coreness, core_size)
}

/// Degree (or strength) correlation across the two ends of each edge.
/// NaN when every edge joins nodes of identical degree.
fn edge_correlation(adj: &Array2<f64>, node_values: &Array1<f64>) -> f64 {
    let n = adj.nrows();
    let (mut prod, mut mean, mut sq, mut k) = (0.0, 0.0, 0.0, 0.0);
    for i in 0..n {
        for j in (i + 1)..n {
            if adj[[i, j]] != 0.0 {
                let (a, b) = (node_values[i], node_values[j]);
                prod += a * b;
                mean += 0.5 * (a + b);
                sq += 0.5 * (a * a + b * b);
                k += 1.0;
            }
        }
    }
    if k == 0.0 {
        return f64::NAN;
    }
    let m = mean / k;
    let denom = sq / k - m * m;
    if denom.abs() <= 1e-12 * (sq / k) {
        return f64::NAN;
    }
    (prod / k - m * m) / denom
}

impl GraphMetrics for NativeMetrics {
    fn degree(&self, adj: &Array2<f64>) -> Array1<f64> {
        degrees(adj)
    }

    fn strength(&self, adj: &Array2<f64>) -> Array1<f64> {
        adj.sum_axis(Axis(1))
    }

    fn clustering_coefficient(&self, adj: &Array2<f64>, kind: GraphType) -> Array1<f64> {
        let k = degrees(adj);
        let cyc = match kind {
            GraphType::Binary => cycles3(adj),
            GraphType::Weighted => cycles3(&cube_root(adj)),
        };
        let mut c = Array1::<f64>::zeros(adj.nrows());
        for i in 0..c.len() {
            if k[i] >= 2.0 {
                c[i] = cyc[i] / (k[i] * (k[i] - 1.0));
            }
        }
        c
    }

    fn local_efficiency(&self, adj: &Array2<f64>, kind: GraphType) -> Array1<f64> {
        match kind {
            GraphType::Binary => paths::local_efficiency_bin(adj),
            GraphType::Weighted => paths::local_efficiency_wei(adj),
        }
    }

    fn betweenness_centrality(&self, adj: &Array2<f64>, kind: GraphType) -> Array1<f64> {
        match kind {
            GraphType::Binary => paths::betweenness_bin(adj),
            GraphType::Weighted => paths::betweenness_wei(&paths::lengths(adj)),
        }
    }

    fn eigenvector_centrality(&self, adj: &Array2<f64>) -> Array1<f64> {
        let n = adj.nrows();
        if n == 0 {
            return Array1::zeros(0);
        }
        let (values, vectors) = symmetric_eigen(adj);
        // Without edges every vector is a leading eigenvector.
        let scale = adj.fold(0.0f64, |m, &x| m.max(x.abs()));
        if values[n - 1] <= 1e-12 * scale {
            return Array1::zeros(n);
        }
        vectors.column(n - 1).mapv(f64::abs)
    }

    fn subgraph_centrality(&self, adj: &Array2<f64>) -> Array1<f64> {
        let (values, vectors) = symmetric_eigen(adj);
        let expv = values.mapv(f64::exp);
        (&vectors * &vectors).dot(&expv)
    }

    fn communities(&self, adj: &Array2<f64>) -> Partition {
        community::louvain(adj)
    }

    fn participation_coefficient(&self, adj: &Array2<f64>, modules: &[usize]) -> Array1<f64> {
        community::participation_coef(adj, modules)
    }

    fn module_degree_zscore(&self, adj: &Array2<f64>, modules: &[usize]) -> Array1<f64> {
        community::module_degree_zscore(adj, modules)
    }

    fn kcoreness(&self, adj: &Array2<f64>) -> (Array1<f64>, Array1<f64>) {
        kcore(adj)
    }

    fn distance_matrix(&self, adj: &Array2<f64>, kind: GraphType) -> Array2<f64> {
        match kind {
            GraphType::Binary => paths::distance_bin(adj),
            GraphType::Weighted => paths::distance_wei(&paths::lengths(adj)),
        }
    }

    fn transitivity(&self, adj: &Array2<f64>, kind: GraphType) -> f64 {
        let k = degrees(adj);
        let cyc = match kind {
            GraphType::Binary => cycles3(adj),
            GraphType::Weighted => cycles3(&cube_root(adj)),
        };
        let triples: f64 = k.iter().map(|&d| d * (d - 1.0)).sum();
        if triples == 0.0 {
            0.0
        } else {
            cyc.sum() / triples
        }
    }

    fn assortativity(&self, adj: &Array2<f64>, kind: GraphType) -> f64 {
        let values = match kind {
            GraphType::Binary => degrees(adj),
            GraphType::Weighted => adj.sum_axis(Axis(1)),
        };
        edge_correlation(adj, &values)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn undirected(n: usize, edges: &[(usize, usize)]) -> Array2<f64> {
        let mut a = Array2::<f64>::zeros((n, n));
        for &(i, j) in edges {
            a[[i, j]] = 1.0;
            a[[j, i]] = 1.0;
        }
        a
    }

    #[test]
    fn clustering_of_a_triangle_with_tail() {
        // Triangle 0-1-2, tail 2-3.
        let a = undirected(4, &[(0, 1), (1, 2), (0, 2), (2, 3)]);
        let c = NativeMetrics.clustering_coefficient(&a, GraphType::Binary);
        assert_abs_diff_eq!(c[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(c[2], 1.0 / 3.0, epsilon = 1e-12);
        assert_eq!(0.0, c[3]);

        // Unit weights give the binary result.
        let cw = NativeMetrics.clustering_coefficient(&a, GraphType::Weighted);
        assert_abs_diff_eq!(cw, c, epsilon = 1e-12);

        // Closed 3-walks 2+2+2+0 over k(k-1) sums 2+2+6+0.
        let t = NativeMetrics.transitivity(&a, GraphType::Binary);
        assert_abs_diff_eq!(t, 6.0 / 10.0, epsilon = 1e-12);
    }

    #[test]
    fn degree_and_strength() {
        let mut a = undirected(3, &[(0, 1), (1, 2)]);
        a[[0, 1]] = 0.5;
        a[[1, 0]] = 0.5;
        assert_eq!(ndarray::array![1.0, 2.0, 1.0], NativeMetrics.degree(&a));
        assert_eq!(ndarray::array![0.5, 1.5, 1.0], NativeMetrics.strength(&a));
    }

    #[test]
    fn eigenvector_centrality_of_a_star() {
        let a = undirected(4, &[(0, 1), (0, 2), (0, 3)]);
        let v = NativeMetrics.eigenvector_centrality(&a);
        // Leading eigenvector of K_{1,3}: (sqrt(3), 1, 1, 1) / sqrt(6).
        assert_abs_diff_eq!(v[0], 3f64.sqrt() / 6f64.sqrt(), epsilon = 1e-9);
        assert_abs_diff_eq!(v[1], 1.0 / 6f64.sqrt(), epsilon = 1e-9);
        assert!(v.iter().all(|&x| x >= 0.0));
    }

    #[test]
    fn eigenvector_centrality_without_edges_is_zero() {
        let v = NativeMetrics.eigenvector_centrality(&Array2::zeros((4, 4)));
        assert_eq!(Array1::<f64>::zeros(4), v);
    }

    #[test]
    fn subgraph_centrality_of_a_single_edge() {
        let a = undirected(2, &[(0, 1)]);
        let sc = NativeMetrics.subgraph_centrality(&a);
        // Eigenvalues ±1 with eigenvectors (1,±1)/sqrt(2): cosh(1).
        assert_abs_diff_eq!(sc[0], 1f64.cosh(), epsilon = 1e-9);
        assert_abs_diff_eq!(sc[1], 1f64.cosh(), epsilon = 1e-9);
    }

    #[test]
    fn kcore_of_triangle_with_tail() {
        let a = undirected(5, &[(0, 1), (1, 2), (0, 2), (2, 3)]);
        let (core, size) = kcore(&a);
        assert_eq!(ndarray::array![2.0, 2.0, 2.0, 1.0, 0.0], core);
        assert_eq!(ndarray::array![3.0, 3.0, 3.0, 4.0, 0.0], size);
    }

    #[test]
    fn assortativity_of_a_star_is_negative() {
        let a = undirected(4, &[(0, 1), (0, 2), (0, 3)]);
        let r = NativeMetrics.assortativity(&a, GraphType::Binary);
        assert_abs_diff_eq!(r, -1.0, epsilon = 1e-12);
    }

    #[test]
    fn assortativity_of_a_regular_graph_is_undefined() {
        let a = undirected(3, &[(0, 1), (1, 2), (0, 2)]);
        assert!(NativeMetrics.assortativity(&a, GraphType::Binary).is_nan());
        assert!(NativeMetrics.assortativity(&Array2::zeros((3, 3)), GraphType::Weighted).is_nan());
    }

    #[test]
    fn strengths_equal_up_to_rounding_count_as_regular() {
        // 0.1 + 0.2 + 0.3 summed in different orders.
        let a = undirected(4, &[(0, 1), (1, 2), (2, 3), (0, 3)]);
        let s = Array1::from(vec![0.1 + 0.2 + 0.3, 0.1 + 0.2 + 0.3, 0.3 + 0.2 + 0.1, 0.3 + 0.2 + 0.1]);
        assert_ne!(s[0], s[2]);
        assert!(edge_correlation(&a, &s).is_nan());
    }
}
