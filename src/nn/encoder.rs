//! Convolutional encoder of the VAMPNet.
//!
//! `Conv(1 → C, 3×3, stride 2) → ReLU → Dense(→ F)` on square single-channel
//! images. All weights live in one flat parameter vector so the optimizers
//! can treat them uniformly:
//!
//! ```text
//! [ conv weights C·9 | conv bias C | dense weights F·(C·o·o), row-major | dense bias F ]
//! ```
//!
//! with `o = (side - 3) / 2 + 1` the side of the feature map.

use nalgebra::{DMatrix, DVector};
use rand::distributions::Uniform;
use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::estimators::FeatureMap;

const KERNEL: usize = 3;
const STRIDE: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvEncoder {
    side: usize,
    channels: usize,
    feature_dim: usize,
    params: DVector<f64>,
}

/// Activations kept from a forward pass for the backward pass.
#[derive(Debug, Clone)]
pub struct ForwardCache {
    images: DMatrix<f64>,
    /// Conv pre-activations, one row per image.
    pre_relu: DMatrix<f64>,
}

impl ConvEncoder {
    /// He-uniform conv weights, Glorot-uniform dense weights, zero biases.
    pub fn new(side: usize, channels: usize, feature_dim: usize, seed: u64) -> Result<Self, AppError> {
        if side < KERNEL {
            return Err(AppError::input(format!("Images must be at least {KERNEL}×{KERNEL}, got side {side}.")));
        }
        if channels == 0 || feature_dim == 0 {
            return Err(AppError::input("Encoder channels and feature_dim must be > 0."));
        }

        let mut encoder = Self {
            side,
            channels,
            feature_dim,
            params: DVector::zeros(0),
        };
        let mut params = DVector::zeros(encoder.n_params());
        let mut rng = StdRng::seed_from_u64(seed);

        let conv_limit = (6.0 / (KERNEL * KERNEL) as f64).sqrt();
        let conv = Uniform::new(-conv_limit, conv_limit);
        for w in params.rows_mut(0, channels * KERNEL * KERNEL).iter_mut() {
            *w = conv.sample(&mut rng);
        }

        let hidden = encoder.hidden_dim();
        let dense_limit = (6.0 / (hidden + feature_dim) as f64).sqrt();
        let dense = Uniform::new(-dense_limit, dense_limit);
        let start = encoder.dense_offset();
        for w in params.rows_mut(start, feature_dim * hidden).iter_mut() {
            *w = dense.sample(&mut rng);
        }

        encoder.params = params;
        Ok(encoder)
    }

    pub fn side(&self) -> usize {
        self.side
    }

    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    pub fn params(&self) -> &DVector<f64> {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut DVector<f64> {
        &mut self.params
    }

    pub fn n_params(&self) -> usize {
        self.channels * (KERNEL * KERNEL + 1) + self.feature_dim * (self.hidden_dim() + 1)
    }

    fn map_side(&self) -> usize {
        (self.side - KERNEL) / STRIDE + 1
    }

    fn hidden_dim(&self) -> usize {
        self.channels * self.map_side() * self.map_side()
    }

    fn dense_offset(&self) -> usize {
        self.channels * (KERNEL * KERNEL + 1)
    }

    fn dense_weights(&self) -> DMatrix<f64> {
        let hidden = self.hidden_dim();
        let start = self.dense_offset();
        DMatrix::from_row_slice(
            self.feature_dim,
            hidden,
            &self.params.as_slice()[start..start + self.feature_dim * hidden],
        )
    }

    fn dense_bias(&self) -> DVector<f64> {
        let start = self.dense_offset() + self.feature_dim * self.hidden_dim();
        self.params.rows(start, self.feature_dim).into_owned()
    }

    /// The most recent image of each row.
    ///
    /// Rows may hold several flattened images (a context window's lookback);
    /// only the last one is encoded.
    fn last_images(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let pixels = self.side * self.side;
        if inputs.ncols() == 0 || inputs.ncols() % pixels != 0 {
            return Err(AppError::input(format!(
                "Encoder expects rows of k·{pixels} pixels, got {} columns.",
                inputs.ncols()
            )));
        }
        Ok(inputs.columns(inputs.ncols() - pixels, pixels).into_owned())
    }

    fn conv_pre_activations(&self, images: &DMatrix<f64>) -> DMatrix<f64> {
        let o = self.map_side();
        let side = self.side;
        let channels = self.channels;
        let weights = &self.params.as_slice()[..channels * KERNEL * KERNEL];
        let bias = &self.params.as_slice()[channels * KERNEL * KERNEL..self.dense_offset()];

        let rows: Vec<Vec<f64>> = (0..images.nrows())
            .into_par_iter()
            .map(|n| {
                let img = images.row(n);
                let mut z = Vec::with_capacity(channels * o * o);
                for c in 0..channels {
                    let w = &weights[c * KERNEL * KERNEL..(c + 1) * KERNEL * KERNEL];
                    for i in 0..o {
                        for j in 0..o {
                            let mut acc = bias[c];
                            for di in 0..KERNEL {
                                for dj in 0..KERNEL {
                                    acc += w[di * KERNEL + dj] * img[(STRIDE * i + di) * side + STRIDE * j + dj];
                                }
                            }
                            z.push(acc);
                        }
                    }
                }
                z
            })
            .collect();

        DMatrix::from_fn(rows.len(), self.hidden_dim(), |i, j| rows[i][j])
    }

    /// Features of each row plus the cache needed by [`ConvEncoder::backward`].
    pub fn forward(&self, inputs: &DMatrix<f64>) -> Result<(DMatrix<f64>, ForwardCache), AppError> {
        let images = self.last_images(inputs)?;
        let pre_relu = self.conv_pre_activations(&images);
        let hidden = pre_relu.map(|v| v.max(0.0));

        let mut features = hidden * self.dense_weights().transpose();
        let bias = self.dense_bias();
        for mut row in features.row_iter_mut() {
            row += bias.transpose();
        }
        Ok((features, ForwardCache { images, pre_relu }))
    }

    /// Gradient of a scalar loss w.r.t. the parameters, given `∂L/∂features`.
    pub fn backward(&self, cache: &ForwardCache, grad_features: &DMatrix<f64>) -> Result<DVector<f64>, AppError> {
        let n = cache.images.nrows();
        if grad_features.shape() != (n, self.feature_dim) {
            return Err(AppError::numeric(format!(
                "Feature gradient has shape {:?}, expected ({n}, {}).",
                grad_features.shape(),
                self.feature_dim
            )));
        }

        let hidden = cache.pre_relu.map(|v| v.max(0.0));
        let mut grad = DVector::zeros(self.n_params());

        // Dense layer.
        let grad_w = grad_features.transpose() * &hidden;
        let start = self.dense_offset();
        let hidden_dim = self.hidden_dim();
        for f in 0..self.feature_dim {
            for h in 0..hidden_dim {
                grad[start + f * hidden_dim + h] = grad_w[(f, h)];
            }
        }
        let bias_start = start + self.feature_dim * hidden_dim;
        for f in 0..self.feature_dim {
            grad[bias_start + f] = grad_features.column(f).sum();
        }

        // Through the ReLU.
        let mut grad_pre = grad_features * self.dense_weights();
        grad_pre.zip_apply(&cache.pre_relu, |g, z| {
            if z <= 0.0 {
                *g = 0.0;
            }
        });

        // Conv layer.
        let o = self.map_side();
        let side = self.side;
        let conv_bias_start = self.channels * KERNEL * KERNEL;
        for s in 0..n {
            let img = cache.images.row(s);
            for c in 0..self.channels {
                for i in 0..o {
                    for j in 0..o {
                        let g = grad_pre[(s, c * o * o + i * o + j)];
                        if g == 0.0 {
                            continue;
                        }
                        for di in 0..KERNEL {
                            for dj in 0..KERNEL {
                                grad[c * KERNEL * KERNEL + di * KERNEL + dj] +=
                                    g * img[(STRIDE * i + di) * side + STRIDE * j + dj];
                            }
                        }
                        grad[conv_bias_start + c] += g;
                    }
                }
            }
        }

        Ok(grad)
    }
}

impl FeatureMap for ConvEncoder {
    fn features(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        Ok(self.forward(inputs)?.0)
    }
}
