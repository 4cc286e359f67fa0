//! Dense linear algebra helpers on top of `nalgebra`.
//!
//! `nalgebra` returns symmetric eigenpairs unsorted and offers no generalized
//! eigensolver, so the estimators go through the wrappers below:
//!
//! - sorted symmetric eigendecomposition
//! - generalized symmetric-definite eigenproblems via Cholesky reduction
//! - Cholesky factorization and SPD solves with a jittered fallback
//! - PSD whitening (pseudo inverse square root)
//! - Gram–Schmidt in an `M`-inner product
//! - eigen-decomposition of small non-symmetric matrices (complex spectrum)

use std::cmp::Ordering;

use nalgebra::{Cholesky, Complex, DMatrix, DVector, Dyn};

use crate::error::AppError;
use crate::logging::NUMERICS_TARGET;

pub type C64 = Complex<f64>;

pub fn ensure_finite(m: &DMatrix<f64>, what: &str) -> Result<(), AppError> {
    if m.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(AppError::numeric(format!("{what} contains non-finite values.")))
    }
}

pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Eigenpairs of a symmetric matrix sorted by decreasing eigenvalue.
pub fn sorted_symmetric_eigen(m: &DMatrix<f64>) -> Result<(DVector<f64>, DMatrix<f64>), AppError> {
    ensure_finite(m, "Symmetric eigenproblem input")?;
    let eig = symmetrize(m).symmetric_eigen();
    let n = eig.eigenvalues.len();

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        eig.eigenvalues[b]
            .partial_cmp(&eig.eigenvalues[a])
            .unwrap_or(Ordering::Equal)
    });

    let values = DVector::from_iterator(n, order.iter().map(|&i| eig.eigenvalues[i]));
    let vectors = eig.eigenvectors.select_columns(order.iter());
    Ok((values, vectors))
}

/// Cholesky factorization, adding diagonal jitter if the plain factorization fails.
pub fn cholesky_factor(m: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>, AppError> {
    ensure_finite(m, "Cholesky input")?;
    let sym = symmetrize(m);
    if let Some(chol) = sym.clone().cholesky() {
        return Ok(chol);
    }

    let n = sym.nrows().max(1);
    let scale = (sym.trace().abs() / n as f64).max(f64::MIN_POSITIVE);
    for k in 0..8 {
        let jitter = scale * 1e-12 * 10f64.powi(k);
        let shifted = &sym + DMatrix::<f64>::identity(sym.nrows(), sym.ncols()) * jitter;
        if let Some(chol) = shifted.cholesky() {
            tracing::warn!(target: NUMERICS_TARGET, jitter, "matrix was not numerically positive definite; added diagonal jitter");
            return Ok(chol);
        }
    }

    Err(AppError::numeric(
        "Cholesky factorization failed: matrix is not positive definite.",
    ))
}

/// Top-`k` eigenpairs of the symmetric-definite pencil `(a, b)`.
///
/// Returned eigenvectors satisfy `Xᵀ b X = I`. Eigenvalues are sorted in
/// decreasing order.
pub fn generalized_symmetric_eigen(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    k: usize,
) -> Result<(DVector<f64>, DMatrix<f64>), AppError> {
    ensure_finite(a, "Generalized eigenproblem lhs")?;
    let l = cholesky_factor(b)?.l();

    let l_inv_a = l
        .solve_lower_triangular(&symmetrize(a))
        .ok_or_else(|| AppError::numeric("Triangular solve failed (singular Cholesky factor)."))?;
    let reduced = l
        .solve_lower_triangular(&l_inv_a.transpose())
        .ok_or_else(|| AppError::numeric("Triangular solve failed (singular Cholesky factor)."))?;

    let (values, vectors) = sorted_symmetric_eigen(&reduced)?;
    let k = k.min(values.len());
    let top = vectors.columns(0, k).into_owned();
    let x = l
        .transpose()
        .solve_upper_triangular(&top)
        .ok_or_else(|| AppError::numeric("Triangular solve failed (singular Cholesky factor)."))?;

    Ok((values.rows(0, k).into_owned(), x))
}

/// Whitening map of a PSD matrix: `V_k diag(λ_k^{-1/2})` over eigenvalues
/// above `rel_tol * λ_max`.
///
/// `Φ W` has identity second moment when `Φᵀ Φ = m`.
pub fn psd_whitening(m: &DMatrix<f64>, rel_tol: f64) -> Result<DMatrix<f64>, AppError> {
    let (values, vectors) = sorted_symmetric_eigen(m)?;
    let max = values.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return Err(AppError::numeric("Matrix has no positive eigenvalues."));
    }

    let keep = values.iter().take_while(|&&v| v > rel_tol * max).count();
    if keep < values.len() {
        tracing::warn!(target: NUMERICS_TARGET, kept = keep, total = values.len(), "dropping near-null directions of a PSD matrix");
    }

    let mut out = vectors.columns(0, keep).into_owned();
    for (j, mut col) in out.column_iter_mut().enumerate() {
        col /= values[j].sqrt();
    }
    Ok(out)
}

/// Gram–Schmidt orthonormalization of the columns of `a` in the inner
/// product `<u, v> = uᵀ M v`, with `M` given as an operator.
///
/// A column is numerically dependent when projecting out the previous ones
/// leaves less than `rel_tol` of its original `M`-norm. Orthonormalization
/// stops at the first such column and returns the columns processed before it.
pub fn m_orthonormalize<F>(a: &DMatrix<f64>, apply_m: F, rel_tol: f64) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let mut q = a.clone();
    let cols = q.ncols();
    let original: Vec<f64> = q
        .column_iter()
        .map(|c| {
            let c = c.into_owned();
            c.dot(&apply_m(&c)).abs().sqrt()
        })
        .collect();
    let mut rank = cols;

    for k in 0..cols {
        let qk = q.column(k).into_owned();
        let mqk = apply_m(&qk);
        let norm = qk.dot(&mqk).abs().sqrt();
        if !(norm > rel_tol * original[k]) {
            rank = k;
            break;
        }

        q.column_mut(k).copy_from(&(qk / norm));
        let mq_unit = mqk / norm;
        for j in (k + 1)..cols {
            let r = mq_unit.dot(&q.column(j));
            let update = q.column(k) * r;
            let mut col = q.column_mut(j);
            col -= update;
        }
    }

    if rank < cols {
        tracing::warn!(target: NUMERICS_TARGET, rank, requested = cols, "M-orthonormalization detected a smaller numerical rank");
    }
    q.columns(0, rank).into_owned()
}

/// Eigenvalues closer than this (relative to the spectral radius, at least 1)
/// are treated as one repeated eigenvalue.
const EIG_CLUSTER_REL_TOL: f64 = 1e-6;

/// Eigenvalues and right eigenvectors of a small real square matrix.
///
/// Eigenvalues are sorted by decreasing modulus (ties: larger imaginary part
/// first). Eigenvalues are grouped into clusters of numerically equal values;
/// a cluster of size `m` takes the `m` right singular vectors of `w - λI`
/// with the smallest singular values, so a repeated eigenvalue of a
/// diagonalizable matrix gets independent eigenvectors. Each vector is
/// normalized to unit length with its largest component real and positive.
pub fn eig_nonsymmetric(w: &DMatrix<f64>) -> Result<(Vec<C64>, DMatrix<C64>), AppError> {
    ensure_finite(w, "Transfer matrix")?;
    if w.nrows() != w.ncols() {
        return Err(AppError::numeric("Eigen-decomposition requires a square matrix."));
    }
    let r = w.nrows();

    let mut evals: Vec<C64> = w.complex_eigenvalues().iter().copied().collect();
    sort_by_modulus(&mut evals);

    let radius = evals.iter().map(|l| l.norm()).fold(1.0_f64, f64::max);
    let tol = EIG_CLUSTER_REL_TOL * radius;

    let wc: DMatrix<C64> = w.map(|v| C64::new(v, 0.0));
    let mut vectors = DMatrix::<C64>::zeros(r, r);
    let mut assigned = vec![false; r];

    for i in 0..r {
        if assigned[i] {
            continue;
        }
        let members: Vec<usize> = (i..r)
            .filter(|&k| !assigned[k] && (evals[k] - evals[i]).norm() <= tol)
            .collect();
        let center = members
            .iter()
            .fold(C64::new(0.0, 0.0), |acc, &k| acc + evals[k])
            / members.len() as f64;

        let shifted = &wc - DMatrix::<C64>::from_diagonal_element(r, r, center);
        let svd = shifted.svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| AppError::numeric("SVD did not return right singular vectors."))?;

        let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[a]
                .partial_cmp(&svd.singular_values[b])
                .unwrap_or(Ordering::Equal)
        });

        for (&col, &row) in members.iter().zip(order.iter()) {
            let mut v = DVector::<C64>::from_iterator(r, (0..r).map(|k| v_t[(row, k)].conj()));
            normalize_phase(&mut v);
            vectors.column_mut(col).copy_from(&v);
            assigned[col] = true;
        }
    }

    Ok((evals, vectors))
}

pub fn sort_by_modulus(values: &mut [C64]) {
    values.sort_by(|a, b| {
        b.norm()
            .partial_cmp(&a.norm())
            .unwrap_or(Ordering::Equal)
            .then(b.im.partial_cmp(&a.im).unwrap_or(Ordering::Equal))
    });
}

fn normalize_phase(v: &mut DVector<C64>) {
    let norm = v.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    if norm == 0.0 {
        return;
    }
    let pivot = v
        .iter()
        .copied()
        .max_by(|a, b| a.norm().partial_cmp(&b.norm()).unwrap_or(Ordering::Equal))
        .unwrap_or(C64::new(1.0, 0.0));
    let phase = pivot.conj() / pivot.norm();
    for c in v.iter_mut() {
        *c = *c * phase / norm;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_eigen_is_sorted_descending() {
        let m = DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 3.0]);
        let (vals, vecs) = sorted_symmetric_eigen(&m).unwrap();
        assert!((vals[0] - 5.0).abs() < 1e-12);
        assert!((vals[1] - 3.0).abs() < 1e-12);
        assert!((vals[2] - 1.0).abs() < 1e-12);
        assert!((vecs[(1, 0)].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn generalized_eigenvectors_are_b_orthonormal() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let b = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 2.0]);
        let (vals, x) = generalized_symmetric_eigen(&a, &b, 2).unwrap();

        let gram = x.transpose() * &b * &x;
        assert!((gram - DMatrix::<f64>::identity(2, 2)).norm() < 1e-10);

        // A x = λ B x
        for j in 0..2 {
            let lhs = &a * x.column(j);
            let rhs = (&b * x.column(j)) * vals[j];
            assert!((lhs - rhs).norm() < 1e-10);
        }
        assert!(vals[0] >= vals[1]);
    }

    #[test]
    fn m_orthonormalize_produces_m_orthonormal_columns() {
        let m = DMatrix::from_row_slice(3, 3, &[3.0, 1.0, 0.0, 1.0, 2.0, 0.5, 0.0, 0.5, 1.0]);
        let a = DMatrix::from_row_slice(3, 2, &[1.0, 0.5, 2.0, -1.0, 0.0, 1.0]);
        let q = m_orthonormalize(&a, |v| &m * v, 1e-10);
        assert_eq!(q.ncols(), 2);
        let gram = q.transpose() * &m * &q;
        assert!((gram - DMatrix::<f64>::identity(2, 2)).norm() < 1e-10);
    }

    #[test]
    fn m_orthonormalize_truncates_dependent_columns() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 0.0, 0.0, 0.0, 1.0]);
        let q = m_orthonormalize(&a, |v| v.clone(), 1e-10);
        assert_eq!(q.ncols(), 1);
    }

    #[test]
    fn rotation_has_conjugate_eigenpair() {
        let theta = 0.3_f64;
        let w = DMatrix::from_row_slice(
            2,
            2,
            &[theta.cos(), -theta.sin(), theta.sin(), theta.cos()],
        );
        let (vals, vecs) = eig_nonsymmetric(&w).unwrap();
        assert!((vals[0].norm() - 1.0).abs() < 1e-10);
        assert!((vals[0].im - theta.sin()).abs() < 1e-10);
        assert!((vals[1].im + theta.sin()).abs() < 1e-10);

        let wc = w.map(|v| C64::new(v, 0.0));
        for j in 0..2 {
            let lhs = &wc * vecs.column(j);
            let rhs = vecs.column(j) * vals[j];
            assert!((lhs - rhs).norm() < 1e-8);
        }
    }

    #[test]
    fn repeated_eigenvalue_gets_independent_eigenvectors() {
        let w = DMatrix::from_row_slice(3, 3, &[0.5, 0.0, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.2]);
        let (vals, vecs) = eig_nonsymmetric(&w).unwrap();
        assert!((vals[0] - C64::new(0.5, 0.0)).norm() < 1e-12);
        assert!((vals[1] - C64::new(0.5, 0.0)).norm() < 1e-12);
        assert!((vals[2] - C64::new(0.2, 0.0)).norm() < 1e-12);

        let wc = w.map(|v| C64::new(v, 0.0));
        for j in 0..3 {
            let lhs = &wc * vecs.column(j);
            let rhs = vecs.column(j) * vals[j];
            assert!((lhs - rhs).norm() < 1e-10);
        }
        let gram = vecs.adjoint() * &vecs;
        assert!(gram[(0, 1)].norm() < 1e-10);
        assert!(vecs.clone().lu().determinant().norm() > 0.5);
    }

    #[test]
    fn psd_whitening_inverts_square_root() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 9.0]);
        let w = psd_whitening(&m, 1e-12).unwrap();
        let check = w.transpose() * &m * &w;
        assert!((check - DMatrix::<f64>::identity(2, 2)).norm() < 1e-12);
    }
}
