//! Dense linear algebra on ndarray matrices, backed by nalgebra.

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};

fn to_nalgebra(a: &Array2<f64>) -> DMatrix<f64> {
    let (nrows, ncols) = a.dim();
    DMatrix::from_fn(nrows, ncols, |i, j| a[[i, j]])
}

fn from_nalgebra(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Eigenvalue decomposition of a real symmetric matrix.
///
/// Returns the eigenvalues in ascending order and the matching eigenvectors as
/// columns. The input is symmetrized (`(A + Aᵀ) / 2`) first.
pub fn symmetric_eigen(a: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = a.nrows();
    let sym = DMatrix::from_fn(n, n, |i, j| 0.5 * (a[[i, j]] + a[[j, i]]));
    let eigen = SymmetricEigen::new(sym);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| eigen.eigenvalues[x].total_cmp(&eigen.eigenvalues[y]));

    let values = Array1::from_shape_fn(n, |k| eigen.eigenvalues[order[k]]);
    let vectors = Array2::from_shape_fn((n, n), |(i, k)| eigen.eigenvectors[(i, order[k])]);
    (values, vectors)
}

/// Inverse of a square matrix, `None` if it is singular.
pub fn inverse(a: &Array2<f64>) -> Option<Array2<f64>> {
    to_nalgebra(a).try_inverse().map(|inv| from_nalgebra(&inv))
}
