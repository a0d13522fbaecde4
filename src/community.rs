//! Community detection and community-based nodal measures.
//!
//! Communities come from a Louvain modularity maximization that visits
//! nodes in index order, so a given matrix always yields the same partition.
//! Labels are still only best-effort: other implementations may find a
//! different partition of similar modularity.

use ndarray::{Array1, Array2};

/// An assignment of nodes to modules and the modularity Q it reaches.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Module index per node, numbered from 0 in order of first appearance.
    pub modules: Vec<usize>,
    pub q: f64,
}

impl Partition {
    pub fn n_modules(&self) -> usize {
        self.modules.iter().max().map_or(0, |m| m + 1)
    }
}

const MIN_GAIN: f64 = 1e-12;

fn positive_part(w: &Array2<f64>) -> Array2<f64> {
    w.mapv(|x| if x > 0.0 && x.is_finite() { x } else { 0.0 })
}

// Relabel to 0..k in order of first appearance.
fn renumber(labels: &[usize]) -> (Vec<usize>, usize) {
    let mut map: Vec<Option<usize>> = vec![None; labels.iter().max().map_or(0, |m| m + 1)];
    let mut next = 0;
    let out = labels
        .iter()
        .map(|&l| {
            *map[l].get_or_insert_with(|| {
                next += 1;
                next - 1
            })
        })
        .collect();
    (out, next)
}

/// Newman modularity of a partition on the positive part of `w`.
pub fn modularity(w: &Array2<f64>, modules: &[usize]) -> f64 {
    let pos = positive_part(w);
    let m2 = pos.sum();
    if m2 <= 0.0 {
        return 0.0;
    }
    let k = pos.sum_axis(ndarray::Axis(1));
    let n = pos.nrows();
    let mut q = 0.0;
    for i in 0..n {
        for j in 0..n {
            if modules[i] == modules[j] {
                q += pos[[i, j]] - k[i] * k[j] / m2;
            }
        }
    }
    q / m2
}

// One pass of local moves on the (possibly aggregated) graph `g`.
// Returns the contiguous community labels and whether any node moved.
fn local_moves(g: &Array2<f64>, m2: f64) -> (Vec<usize>, bool) {
    let n = g.nrows();
    let k: Vec<f64> = (0..n).map(|i| g.row(i).sum()).collect();
    let mut comm: Vec<usize> = (0..n).collect();
    let mut tot: Vec<f64> = k.clone();
    let mut links = vec![0.0; n];
    let mut touched: Vec<usize> = Vec::with_capacity(n);
    let mut moved_any = false;

    loop {
        let mut moved = false;
        for i in 0..n {
            let ci = comm[i];
            for j in 0..n {
                if j != i && g[[i, j]] > 0.0 {
                    let c = comm[j];
                    if links[c] == 0.0 {
                        touched.push(c);
                    }
                    links[c] += g[[i, j]];
                }
            }
            touched.sort_unstable();

            tot[ci] -= k[i];
            let mut best = ci;
            let mut best_gain = links[ci] - k[i] * tot[ci] / m2;
            for &c in &touched {
                let gain = links[c] - k[i] * tot[c] / m2;
                if gain > best_gain + MIN_GAIN {
                    best = c;
                    best_gain = gain;
                }
            }
            tot[best] += k[i];
            comm[i] = best;
            if best != ci {
                moved = true;
                moved_any = true;
            }

            for &c in &touched {
                links[c] = 0.0;
            }
            touched.clear();
        }
        if !moved {
            break;
        }
    }
    let (labels, _) = renumber(&comm);
    (labels, moved_any)
}

fn aggregate(g: &Array2<f64>, labels: &[usize], n_comm: usize) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((n_comm, n_comm));
    for i in 0..g.nrows() {
        for j in 0..g.ncols() {
            out[[labels[i], labels[j]]] += g[[i, j]];
        }
    }
    out
}

/// Louvain community detection (resolution 1) on the positive part of `w`.
///
/// A graph without positive edges puts every node in its own module with Q = 0.
pub fn louvain(w: &Array2<f64>) -> Partition {
    let n = w.nrows();
    let pos = positive_part(w);
    let m2 = pos.sum();
    if n == 0 || m2 <= 0.0 {
        return Partition { modules: (0..n).collect(), q: 0.0 };
    }

    let mut membership: Vec<usize> = (0..n).collect();
    let mut graph = pos.clone();
    loop {
        let (labels, moved) = local_moves(&graph, m2);
        if !moved {
            break;
        }
        let n_comm = labels.iter().max().map_or(0, |m| m + 1);
        for m in membership.iter_mut() {
            *m = labels[*m];
        }
        if n_comm == graph.nrows() {
            break;
        }
        graph = aggregate(&graph, &labels, n_comm);
    }

    let (modules, _) = renumber(&membership);
    let q = modularity(&pos, &modules);
    Partition { modules, q }
}

/// Participation coefficient: `1 - Σ_s (k_is / k_i)²` over modules s, 0 for isolated nodes.
pub fn participation_coef(w: &Array2<f64>, modules: &[usize]) -> Array1<f64> {
    let n = w.nrows();
    let n_mod = modules.iter().max().map_or(0, |m| m + 1);
    let mut p = Array1::<f64>::zeros(n);
    for i in 0..n {
        let ko: f64 = w.row(i).sum();
        if ko == 0.0 {
            continue;
        }
        let mut per_module = vec![0.0; n_mod];
        for j in 0..n {
            if w[[i, j]] != 0.0 {
                per_module[modules[j]] += w[[i, j]];
            }
        }
        p[i] = 1.0 - per_module.iter().map(|kis| (kis / ko).powi(2)).sum::<f64>();
    }
    p
}

/// Within-module degree z-score. Modules whose members all have the same within-module
/// degree (including single-node modules) give 0.
pub fn module_degree_zscore(w: &Array2<f64>, modules: &[usize]) -> Array1<f64> {
    let n = w.nrows();
    let n_mod = modules.iter().max().map_or(0, |m| m + 1);
    let mut z = Array1::<f64>::zeros(n);
    for m in 0..n_mod {
        let members: Vec<usize> = (0..n).filter(|&i| modules[i] == m).collect();
        let koi: Vec<f64> = members
            .iter()
            .map(|&i| members.iter().map(|&j| w[[i, j]]).sum())
            .collect();
        let cnt = koi.len() as f64;
        let mean = koi.iter().sum::<f64>() / cnt;
        // Sample standard deviation (n - 1).
        let var = if koi.len() > 1 {
            koi.iter().map(|k| (k - mean).powi(2)).sum::<f64>() / (cnt - 1.0)
        } else {
            0.0
        };
        let sd = var.sqrt();
        for (&i, &k) in members.iter().zip(koi.iter()) {
            let v = (k - mean) / sd;
            z[i] = if v.is_finite() { v } else { 0.0 };
        }
    }
    z
}


#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    // Two triangles {0,1,2} and {3,4,5} joined by the edge 2-3.
    fn two_triangles() -> Array2<f64> {
        let mut a = Array2::<f64>::zeros((6, 6));
        for &(i, j) in &[(0, 1), (0, 2), (1, 2), (3, 4), (3, 5), (4, 5), (2, 3)] {
            a[[i, j]] = 1.0;
            a[[j, i]] = 1.0;
        }
        a
    }

    #[test]
    fn louvain_separates_two_triangles() {
        let p = louvain(&two_triangles());
        assert_eq!(vec![0, 0, 0, 1, 1, 1], p.modules);
        assert_eq!(2, p.n_modules());
        // m = 7: Q = 2 * (3/7 - (7/14)^2) = 5/14.
        assert_abs_diff_eq!(p.q, 5.0 / 14.0, epsilon = 1e-12);
    }

    #[test]
    fn louvain_is_deterministic() {
        let a = two_triangles();
        assert_eq!(louvain(&a), louvain(&a));
    }

    #[test]
    fn empty_graph_gives_singleton_modules() {
        let p = louvain(&Array2::zeros((3, 3)));
        assert_eq!(vec![0, 1, 2], p.modules);
        assert_eq!(0.0, p.q);
    }

    #[test]
    fn participation_of_bridge_nodes() {
        let a = two_triangles();
        let p = participation_coef(&a, &[0, 0, 0, 1, 1, 1]);
        assert_eq!(0.0, p[0]);
        // Node 2: 2 edges inside, 1 outside: 1 - (4/9 + 1/9) = 4/9.
        assert_abs_diff_eq!(p[2], 4.0 / 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p[3], 4.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn zscore_is_zero_for_regular_modules() {
        let a = two_triangles();
        let z = module_degree_zscore(&a, &[0, 0, 0, 1, 1, 1]);
        assert!(z.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zscore_of_a_module_hub() {
        // Star with centre 0 inside one module.
        let mut a = Array2::<f64>::zeros((4, 4));
        for leaf in 1..4 {
            a[[0, leaf]] = 1.0;
            a[[leaf, 0]] = 1.0;
        }
        let z = module_degree_zscore(&a, &[0, 0, 0, 0]);
        // Within-module degrees 3,1,1,1: mean 1.5, sd 1.
        assert_abs_diff_eq!(z[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(z[1], -0.5, epsilon = 1e-12);
    }
}
