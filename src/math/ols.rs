//! Least squares via SVD.
//!
//! Used to recover spectral modes (`P x = B` for the eigenvector matrix `P`),
//! and wherever a possibly rank-deficient system has to be solved without
//! failing outright.
//!
//! Implementation choices:
//! - SVD rather than QR: nalgebra's `QR::solve` is intended for square systems
//!   and panics on tall matrices.
//! - Generic over the scalar so the same routine serves real and complex
//!   systems (eigenvectors of a non-symmetric operator are complex).

use nalgebra::{ComplexField, DMatrix};

/// Solve `x * beta = y` in the least squares sense.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares<T>(x: &DMatrix<T>, y: &DMatrix<T>) -> Option<DMatrix<T>>
where
    T: ComplexField<RealField = f64>,
{
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Complex;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DMatrix::from_row_slice(3, 1, &[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[(0, 0)] - 2.0).abs() < 1e-10);
        assert!((beta[(1, 0)] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn least_squares_handles_complex_square_system() {
        let i = Complex::new(0.0, 1.0);
        let one = Complex::new(1.0, 0.0);
        let x = DMatrix::from_row_slice(2, 2, &[one, i, -i, one * 2.0]);
        let truth = DMatrix::from_row_slice(2, 1, &[Complex::new(1.0, -1.0), Complex::new(0.5, 2.0)]);
        let y = &x * &truth;

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((&beta - &truth).norm() < 1e-10);
    }
}
