//! Ordered MNIST: digit images arranged so that the label cycles
//! `0, 1, ..., classes-1, 0, 1, ...`.
//!
//! The raw dataset is read from the uncompressed IDX files
//! (`train-images-idx3-ubyte`, `train-labels-idx1-ubyte`). For offline runs a
//! synthetic set of noisy oriented-bar glyphs with the same layout is
//! available through [`OrderedMnist::synthetic`].

use std::fs;
use std::path::Path;

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::data::Trajectory;
use crate::error::AppError;

pub const IMAGES_FILE: &str = "train-images-idx3-ubyte";
pub const LABELS_FILE: &str = "train-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;

/// Images (one flattened `side × side` image per row, pixels in `[0, 1]`)
/// together with their labels, in cyclic label order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMnist {
    images: DMatrix<f64>,
    labels: Vec<u8>,
    side: usize,
    classes: usize,
}

impl OrderedMnist {
    /// Load `n_total` ordered images of classes `0..classes` from `dir`.
    pub fn load(dir: &Path, classes: usize, n_total: usize) -> Result<Self, AppError> {
        check_classes(classes)?;
        let images_path = dir.join(IMAGES_FILE);
        let labels_path = dir.join(LABELS_FILE);

        let image_bytes = fs::read(&images_path).map_err(|e| {
            AppError::input(format!("Failed to read {}: {e}", images_path.display()))
        })?;
        let label_bytes = fs::read(&labels_path).map_err(|e| {
            AppError::input(format!("Failed to read {}: {e}", labels_path.display()))
        })?;

        let (side, pixels) = parse_idx_images(&image_bytes)?;
        let labels = parse_idx_labels(&label_bytes)?;
        if labels.len() != pixels.len() {
            return Err(AppError::input(format!(
                "Image/label count mismatch: {} images, {} labels.",
                pixels.len(),
                labels.len()
            )));
        }

        tracing::info!(images = pixels.len(), side, dir = %dir.display(), "loaded MNIST");
        Self::arrange(pixels, labels, side, classes, n_total)
    }

    /// Noisy oriented-bar glyphs: class `c` is a bar at angle `c·π/classes`.
    pub fn synthetic(classes: usize, n_total: usize, side: usize, seed: u64) -> Result<Self, AppError> {
        check_classes(classes)?;
        if side < 8 {
            return Err(AppError::input(format!("Synthetic glyph side must be >= 8, got {side}.")));
        }
        if n_total == 0 {
            return Err(AppError::input("Number of synthetic images must be > 0."));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.1)
            .map_err(|e| AppError::numeric(format!("Noise distribution error: {e}")))?;

        let mut flat = Vec::with_capacity(n_total * side * side);
        let mut labels = Vec::with_capacity(n_total);
        for t in 0..n_total {
            let class = t % classes;
            let jitter = rng.gen_range(-0.15..0.15);
            let angle = std::f64::consts::PI * class as f64 / classes as f64 + jitter;
            flat.extend(render_bar(side, angle).into_iter().map(|v| {
                (v + noise.sample(&mut rng)).clamp(0.0, 1.0)
            }));
            labels.push(class as u8);
        }

        Ok(Self {
            images: DMatrix::from_row_slice(n_total, side * side, &flat),
            labels,
            side,
            classes,
        })
    }

    fn arrange(
        pixels: Vec<Vec<u8>>,
        labels: Vec<u8>,
        side: usize,
        classes: usize,
        n_total: usize,
    ) -> Result<Self, AppError> {
        let mut pools: Vec<Vec<usize>> = vec![Vec::new(); classes];
        for (i, &label) in labels.iter().enumerate() {
            if (label as usize) < classes {
                pools[label as usize].push(i);
            }
        }

        let per_class = pools.iter().map(Vec::len).min().unwrap_or(0);
        let available = per_class * classes;
        if n_total > available {
            return Err(AppError::data(format!(
                "Requested {n_total} ordered images but only {available} are available for {classes} classes."
            )));
        }

        let dim = side * side;
        let mut flat = Vec::with_capacity(n_total * dim);
        let mut ordered_labels = Vec::with_capacity(n_total);
        for t in 0..n_total {
            let class = t % classes;
            let idx = pools[class][t / classes];
            flat.extend(pixels[idx].iter().map(|&p| p as f64 / 255.0));
            ordered_labels.push(class as u8);
        }

        Ok(Self {
            images: DMatrix::from_row_slice(n_total, dim, &flat),
            labels: ordered_labels,
            side,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn images(&self) -> &DMatrix<f64> {
        &self.images
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// The image sequence as a trajectory (one state per image).
    pub fn trajectory(&self) -> Result<Trajectory, AppError> {
        Trajectory::new(self.images.clone())
    }

    /// Split into two disjoint consecutive parts of `n_first` and the rest.
    pub fn split(&self, n_first: usize) -> Result<(Self, Self), AppError> {
        if n_first == 0 || n_first >= self.len() {
            return Err(AppError::data(format!(
                "Cannot split {} images at {n_first}.",
                self.len()
            )));
        }
        let rest = self.len() - n_first;
        let first = Self {
            images: self.images.rows(0, n_first).into_owned(),
            labels: self.labels[..n_first].to_vec(),
            side: self.side,
            classes: self.classes,
        };
        let second = Self {
            images: self.images.rows(n_first, rest).into_owned(),
            labels: self.labels[n_first..].to_vec(),
            side: self.side,
            classes: self.classes,
        };
        Ok((first, second))
    }

    /// Label of the output state of each stride-1 window of length `context_len`.
    pub fn window_output_labels(&self, context_len: usize) -> Vec<u8> {
        if context_len == 0 || context_len > self.len() {
            return Vec::new();
        }
        self.labels[context_len - 1..].to_vec()
    }
}

fn check_classes(classes: usize) -> Result<(), AppError> {
    if !(2..=10).contains(&classes) {
        return Err(AppError::input(format!(
            "Number of classes must be between 2 and 10, got {classes}."
        )));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32, AppError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| <[u8; 4]>::try_from(b).ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| AppError::input("Truncated IDX header."))
}

/// Parse an IDX3 image file into `(side, images)`.
pub fn parse_idx_images(bytes: &[u8]) -> Result<(usize, Vec<Vec<u8>>), AppError> {
    let magic = read_u32(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        return Err(AppError::input(format!("Unexpected IDX image magic number {magic:#010x}.")));
    }
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;
    if rows != cols || rows == 0 {
        return Err(AppError::input(format!("Expected square images, got {rows}x{cols}.")));
    }

    let (dim, total) = rows
        .checked_mul(cols)
        .and_then(|dim| count.checked_mul(dim).map(|total| (dim, total)))
        .ok_or_else(|| AppError::input("IDX header declares an impossible size."))?;
    let body = &bytes[16..];
    if body.len() < total {
        return Err(AppError::input(format!(
            "IDX image file truncated: expected {total} bytes of pixels, found {}.",
            body.len()
        )));
    }
    let images = body[..total].chunks(dim).map(<[u8]>::to_vec).collect();
    Ok((rows, images))
}

/// Parse an IDX1 label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>, AppError> {
    let magic = read_u32(bytes, 0)?;
    if magic != LABELS_MAGIC {
        return Err(AppError::input(format!("Unexpected IDX label magic number {magic:#010x}.")));
    }
    let count = read_u32(bytes, 4)? as usize;
    let body = &bytes[8..];
    if body.len() < count {
        return Err(AppError::input("IDX label file truncated."));
    }
    Ok(body[..count].to_vec())
}

/// Render an anti-aliased bar through the image center.
fn render_bar(side: usize, angle: f64) -> Vec<f64> {
    let c = (side as f64 - 1.0) / 2.0;
    let (dx, dy) = (angle.cos(), angle.sin());
    let half_len = side as f64 * 0.35;
    let half_width = (side as f64 / 14.0).max(1.0);

    let mut out = vec![0.0; side * side];
    for r in 0..side {
        for col in 0..side {
            let x = col as f64 - c;
            let y = c - r as f64;
            let along = x * dx + y * dy;
            let across = (-x * dy + y * dx).abs();
            if along.abs() <= half_len {
                out[r * side + col] = (1.0 - (across - half_width).max(0.0)).clamp(0.0, 1.0);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx_images(images: &[Vec<u8>], side: usize) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        out.extend_from_slice(&(images.len() as u32).to_be_bytes());
        out.extend_from_slice(&(side as u32).to_be_bytes());
        out.extend_from_slice(&(side as u32).to_be_bytes());
        for img in images {
            out.extend_from_slice(img);
        }
        out
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&LABELS_MAGIC.to_be_bytes());
        out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        out.extend_from_slice(labels);
        out
    }

    #[test]
    fn idx_round_trip_and_ordering() {
        let side = 2;
        let labels = vec![1u8, 0, 2, 1, 0, 3, 0, 1];
        let images: Vec<Vec<u8>> = (0..labels.len()).map(|i| vec![i as u8; side * side]).collect();

        let (parsed_side, parsed) = parse_idx_images(&idx_images(&images, side)).unwrap();
        assert_eq!(parsed_side, 2);
        assert_eq!(parsed.len(), 8);
        let parsed_labels = parse_idx_labels(&idx_labels(&labels)).unwrap();

        let ordered = OrderedMnist::arrange(parsed, parsed_labels, side, 2, 6).unwrap();
        assert_eq!(ordered.labels(), &[0, 1, 0, 1, 0, 1]);
        // First class-0 image is index 1, first class-1 image is index 0.
        assert!((ordered.images()[(0, 0)] - 1.0 / 255.0).abs() < 1e-12);
        assert!((ordered.images()[(1, 0)] - 0.0).abs() < 1e-12);
        // Second class-0 image is index 4.
        assert!((ordered.images()[(2, 0)] - 4.0 / 255.0).abs() < 1e-12);
    }

    #[test]
    fn too_many_requested_images_is_a_data_error() {
        let err = OrderedMnist::arrange(vec![vec![0; 4]; 3], vec![0, 1, 0], 2, 2, 4).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_DATA);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert!(parse_idx_labels(&[0, 0, 8, 3, 0, 0, 0, 0]).is_err());
        assert!(parse_idx_images(&[0, 0, 8]).is_err());
    }

    #[test]
    fn oversized_header_is_an_input_error() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&IMAGES_MAGIC.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        bytes.extend_from_slice(&[0; 32]);
        let err = parse_idx_images(&bytes).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.message().contains("impossible size"));
    }

    #[test]
    fn synthetic_labels_cycle_and_split_is_disjoint() {
        let data = OrderedMnist::synthetic(5, 23, 12, 3).unwrap();
        assert_eq!(data.len(), 23);
        assert!(data.labels().iter().enumerate().all(|(t, &l)| l as usize == t % 5));
        assert!(data.images().iter().all(|&v| (0.0..=1.0).contains(&v)));

        let (train, val) = data.split(15).unwrap();
        assert_eq!(train.len() + val.len(), 23);
        assert_eq!(val.labels()[0], 0);
        assert_eq!(train.window_output_labels(2).len(), 14);
        assert_eq!(train.window_output_labels(2)[0], 1);
    }

    #[test]
    fn synthetic_classes_are_distinguishable() {
        let data = OrderedMnist::synthetic(4, 8, 16, 1).unwrap();
        let a = data.images().row(0) - data.images().row(4);
        let b = data.images().row(0) - data.images().row(1);
        assert!(a.norm() < b.norm());
    }
}
