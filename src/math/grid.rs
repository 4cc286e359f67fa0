//! Geometric grids for the training-set-size sweep.

use crate::error::AppError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, AppError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max >= min) {
        return Err(AppError::input(format!(
            "Invalid geometric range: min={min}, max={max} (must be finite, >0, and max>=min)."
        )));
    }
    if steps == 0 {
        return Err(AppError::input("Grid steps must be >= 1."));
    }
    if steps == 1 {
        return Ok(vec![max]);
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    Ok(out)
}

/// Integer training-set sizes on a geometric grid.
///
/// Values are rounded, clamped to `available`, and deduplicated while keeping
/// increasing order, so the result may be shorter than `steps`.
pub fn geometric_sizes(
    min: usize,
    max: usize,
    steps: usize,
    available: usize,
) -> Result<Vec<usize>, AppError> {
    if available == 0 {
        return Err(AppError::data("No training windows available for the sweep."));
    }
    let grid = log_space(min.max(1) as f64, max.max(1) as f64, steps)?;

    let mut sizes: Vec<usize> = Vec::with_capacity(grid.len());
    for v in grid {
        let size = (v.round() as usize).clamp(1, available);
        if sizes.last() != Some(&size) {
            sizes.push(size);
        }
    }
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_space_includes_endpoints() {
        let v = log_space(100.0, 10_000.0, 10).unwrap();
        assert_eq!(v.len(), 10);
        assert!((v[0] - 100.0).abs() < 1e-9);
        assert!((v[9] - 10_000.0).abs() < 1e-6);
    }

    #[test]
    fn geometric_sizes_matches_notebook_grid() {
        // Ten geometric steps from 100 to 10 000, rounded.
        let sizes = geometric_sizes(100, 10_000, 10, 10_000).unwrap();
        assert_eq!(
            sizes,
            vec![100, 167, 278, 464, 774, 1292, 2154, 3594, 5995, 10_000]
        );
    }

    #[test]
    fn geometric_sizes_clamps_and_dedups() {
        let sizes = geometric_sizes(10, 1000, 5, 50).unwrap();
        assert_eq!(sizes, vec![10, 32, 50]);
    }

    #[test]
    fn invalid_range_is_rejected() {
        assert!(log_space(10.0, 1.0, 3).is_err());
        assert!(log_space(1.0, 10.0, 0).is_err());
    }
}
