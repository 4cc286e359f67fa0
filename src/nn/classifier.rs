//! Nearest-centroid oracle classifier in pixel space.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestCentroid {
    /// One centroid per row.
    centroids: DMatrix<f64>,
    labels: Vec<u8>,
}

impl NearestCentroid {
    /// Mean image of every label present in `labels`.
    pub fn fit(samples: &DMatrix<f64>, labels: &[u8]) -> Result<Self, AppError> {
        if samples.nrows() != labels.len() {
            return Err(AppError::input(format!(
                "{} samples but {} labels.",
                samples.nrows(),
                labels.len()
            )));
        }
        let mut classes: Vec<u8> = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.is_empty() {
            return Err(AppError::data("Cannot fit a classifier without samples."));
        }

        let mut centroids = DMatrix::zeros(classes.len(), samples.ncols());
        let mut counts = vec![0usize; classes.len()];
        for (row, label) in samples.row_iter().zip(labels) {
            // `classes` is sorted and contains every label.
            let Ok(k) = classes.binary_search(label) else {
                continue;
            };
            let mut centroid = centroids.row_mut(k);
            centroid += row;
            counts[k] += 1;
        }
        for (k, &count) in counts.iter().enumerate() {
            let mut centroid = centroids.row_mut(k);
            centroid /= count as f64;
        }

        Ok(Self {
            centroids,
            labels: classes,
        })
    }

    pub fn classes(&self) -> &[u8] {
        &self.labels
    }

    pub fn predict(&self, samples: &DMatrix<f64>) -> Result<Vec<u8>, AppError> {
        if samples.ncols() != self.centroids.ncols() {
            return Err(AppError::input(format!(
                "Samples have {} features, the classifier was fitted on {}.",
                samples.ncols(),
                self.centroids.ncols()
            )));
        }
        Ok(samples
            .row_iter()
            .map(|row| {
                let mut best = (f64::INFINITY, self.labels[0]);
                for (k, centroid) in self.centroids.row_iter().enumerate() {
                    let dist = (row - centroid).norm_squared();
                    if dist < best.0 {
                        best = (dist, self.labels[k]);
                    }
                }
                best.1
            })
            .collect())
    }
}

/// Fraction of equal labels.
pub fn accuracy(predicted: &[u8], truth: &[u8]) -> Result<f64, AppError> {
    if predicted.len() != truth.len() || truth.is_empty() {
        return Err(AppError::data(format!(
            "Cannot score {} predictions against {} labels.",
            predicted.len(),
            truth.len()
        )));
    }
    let hits = predicted.iter().zip(truth).filter(|(p, t)| p == t).count();
    Ok(hits as f64 / truth.len() as f64)
}
