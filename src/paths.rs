//! Shortest paths, betweenness and path-based summaries.
//!
//! Unreachable pairs have distance +inf. Path summaries follow the
//! convention that unreachable pairs add nothing to efficiency and are left
//! out of path length and eccentricity.

use std::collections::VecDeque;

use ndarray::{Array1, Array2};

/// Single-source shortest path data used by distances and Brandes betweenness.
struct SingleSource {
    dist: Vec<f64>,
    /// Nodes in order of non-decreasing distance from the source.
    order: Vec<usize>,
    preds: Vec<Vec<usize>>,
    sigma: Vec<f64>,
}

fn bfs(adj: &Array2<f64>, s: usize) -> SingleSource {
    let n = adj.nrows();
    let mut dist = vec![f64::INFINITY; n];
    let mut sigma = vec![0.0; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order = Vec::with_capacity(n);
    let mut queue = VecDeque::new();

    dist[s] = 0.0;
    sigma[s] = 1.0;
    queue.push_back(s);
    while let Some(v) = queue.pop_front() {
        order.push(v);
        for w in 0..n {
            if w == v || adj[[v, w]] == 0.0 {
                continue;
            }
            if dist[w].is_infinite() {
                dist[w] = dist[v] + 1.0;
                queue.push_back(w);
            }
            if dist[w] == dist[v] + 1.0 {
                sigma[w] += sigma[v];
                preds[w].push(v);
            }
        }
    }
    SingleSource { dist, order, preds, sigma }
}

// Dense O(n²) Dijkstra; ties in the queue go to the lowest node index.
fn dijkstra(len: &Array2<f64>, s: usize) -> SingleSource {
    let n = len.nrows();
    let mut dist = vec![f64::INFINITY; n];
    let mut sigma = vec![0.0; n];
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut order = Vec::with_capacity(n);
    let mut done = vec![false; n];

    dist[s] = 0.0;
    sigma[s] = 1.0;
    loop {
        let mut next: Option<usize> = None;
        for v in 0..n {
            if !done[v] && dist[v].is_finite() && next.map_or(true, |u| dist[v] < dist[u]) {
                next = Some(v);
            }
        }
        let v = match next {
            Some(v) => v,
            None => break,
        };
        done[v] = true;
        order.push(v);
        for w in 0..n {
            let l = len[[v, w]];
            if done[w] || w == v || l <= 0.0 || !l.is_finite() {
                continue;
            }
            let d = dist[v] + l;
            if d < dist[w] {
                dist[w] = d;
                sigma[w] = sigma[v];
                preds[w].clear();
                preds[w].push(v);
            } else if d == dist[w] {
                sigma[w] += sigma[v];
                preds[w].push(v);
            }
        }
    }
    SingleSource { dist, order, preds, sigma }
}

/// Connection-length matrix: `1/w` for positive weights, 0 (no edge) otherwise.
pub fn lengths(w: &Array2<f64>) -> Array2<f64> {
    w.mapv(|x| if x > 0.0 && x.is_finite() { 1.0 / x } else { 0.0 })
}

/// Hop-count distances of a binary graph.
pub fn distance_bin(adj: &Array2<f64>) -> Array2<f64> {
    let n = adj.nrows();
    let mut d = Array2::<f64>::from_elem((n, n), f64::INFINITY);
    for s in 0..n {
        let ss = bfs(adj, s);
        for t in 0..n {
            d[[s, t]] = ss.dist[t];
        }
    }
    d
}

/// Weighted shortest path lengths over a connection-length matrix (see [`lengths`]).
pub fn distance_wei(len: &Array2<f64>) -> Array2<f64> {
    let n = len.nrows();
    let mut d = Array2::<f64>::from_elem((n, n), f64::INFINITY);
    for s in 0..n {
        let ss = dijkstra(len, s);
        for t in 0..n {
            d[[s, t]] = ss.dist[t];
        }
    }
    d
}

fn brandes<F>(n: usize, single_source: F) -> Array1<f64>
where
    F: Fn(usize) -> SingleSource,
{
    let mut bc = Array1::<f64>::zeros(n);
    for s in 0..n {
        let ss = single_source(s);
        let mut delta = vec![0.0; n];
        for &w in ss.order.iter().rev() {
            for &v in &ss.preds[w] {
                delta[v] += ss.sigma[v] / ss.sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                bc[w] += delta[w];
            }
        }
    }
    bc
}

/// Betweenness centrality of a binary graph, counted over ordered node pairs.
pub fn betweenness_bin(adj: &Array2<f64>) -> Array1<f64> {
    brandes(adj.nrows(), |s| bfs(adj, s))
}

/// Betweenness centrality over a connection-length matrix, counted over ordered node pairs.
pub fn betweenness_wei(len: &Array2<f64>) -> Array1<f64> {
    brandes(len.nrows(), |s| dijkstra(len, s))
}

/// Path-based summary of a distance matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSummary {
    /// Mean of the finite off-diagonal distances, NaN if no pair is connected.
    pub char_path_length: f64,
    /// Mean inverse distance over all ordered pairs, unreachable pairs count as 0.
    pub global_efficiency: f64,
    /// Largest finite distance from each node, 0 for isolated nodes.
    pub eccentricity: Array1<f64>,
    pub radius: f64,
    pub diameter: f64,
}

/// Characteristic path length, global efficiency, eccentricity, radius and diameter.
pub fn char_path(d: &Array2<f64>) -> PathSummary {
    let n = d.nrows();
    let mut sum = 0.0;
    let mut finite = 0usize;
    let mut inv_sum = 0.0;
    let mut eccentricity = Array1::<f64>::zeros(n);

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            let v = d[[i, j]];
            if v.is_finite() {
                sum += v;
                finite += 1;
                if v > 0.0 {
                    inv_sum += 1.0 / v;
                }
                if v > eccentricity[i] {
                    eccentricity[i] = v;
                }
            }
        }
    }

    let pairs = n * n.saturating_sub(1);
    let char_path_length = if finite > 0 { sum / finite as f64 } else { f64::NAN };
    let global_efficiency = if pairs > 0 { inv_sum / pairs as f64 } else { 0.0 };
    let radius = eccentricity.iter().cloned().fold(f64::INFINITY, f64::min);
    let diameter = eccentricity.iter().cloned().fold(0.0, f64::max);

    PathSummary {
        char_path_length,
        global_efficiency,
        eccentricity,
        radius: if n > 0 { radius } else { 0.0 },
        diameter,
    }
}

fn neighbours(adj: &Array2<f64>, u: usize) -> Vec<usize> {
    (0..adj.ncols()).filter(|&v| v != u && adj[[u, v]] != 0.0).collect()
}

fn submatrix(w: &Array2<f64>, idx: &[usize]) -> Array2<f64> {
    Array2::from_shape_fn((idx.len(), idx.len()), |(i, j)| w[[idx[i], idx[j]]])
}

/// Local efficiency of a binary graph: global efficiency of each node's neighbourhood subgraph.
pub fn local_efficiency_bin(adj: &Array2<f64>) -> Array1<f64> {
    let n = adj.nrows();
    let mut e = Array1::<f64>::zeros(n);
    for u in 0..n {
        let nb = neighbours(adj, u);
        let k = nb.len();
        if k < 2 {
            continue;
        }
        let d = distance_bin(&submatrix(adj, &nb));
        let numer: f64 = d.iter().filter(|v| v.is_finite() && **v > 0.0).map(|v| 1.0 / v).sum();
        e[u] = numer / (k * (k - 1)) as f64;
    }
    e
}

/// Local efficiency of a weighted graph (weights in `[0, 1]`), using the cube-root
/// formulation of Wang et al. (2016) as in the Brain Connectivity Toolbox.
pub fn local_efficiency_wei(w: &Array2<f64>) -> Array1<f64> {
    let n = w.nrows();
    let mut e = Array1::<f64>::zeros(n);
    for u in 0..n {
        let nb = neighbours(w, u);
        let k = nb.len();
        if k < 2 {
            continue;
        }
        let d = distance_wei(&lengths(&submatrix(w, &nb)));
        let mut numer = 0.0;
        for i in 0..k {
            for j in 0..k {
                let dij = d[[i, j]];
                if i == j || !dij.is_finite() || dij <= 0.0 {
                    continue;
                }
                numer += (w[[u, nb[i]]] * w[[u, nb[j]]] / dij).cbrt();
            }
        }
        e[u] = numer / (k * (k - 1)) as f64;
    }
    e
}
