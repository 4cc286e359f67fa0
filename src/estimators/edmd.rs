//! Extended DMD: primal regression on a user-supplied feature map.
//!
//! With [`IdentityFeatures`] this is plain (regularized, low-rank) DMD. The
//! VAMPNet encoder implements [`FeatureMap`] too, which is how the training
//! harness evaluates a learned representation.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::data::ContextBatch;
use crate::error::AppError;
use crate::estimators::primal::PrimalFit;
use crate::estimators::{KoopmanEstimator, ReducedOperator, Regression, validate_low_rank};

/// Dictionary of observables used to lift the (flattened) inputs.
pub trait FeatureMap {
    fn features(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError>;
}

/// `Φ(x) = x`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityFeatures;

impl FeatureMap for IdentityFeatures {
    fn features(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        Ok(inputs.clone())
    }
}

impl<F: FeatureMap + ?Sized> FeatureMap for &F {
    fn features(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        (**self).features(inputs)
    }
}

const NAME: &str = "ExtendedDMD";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendedDmd<F> {
    pub feature_map: F,
    pub rank: usize,
    pub tikhonov_reg: f64,
    #[serde(default)]
    pub regression: Regression,
    fitted: Option<PrimalFit>,
}

impl<F: FeatureMap> ExtendedDmd<F> {
    pub fn new(feature_map: F, rank: usize, tikhonov_reg: f64) -> Self {
        Self {
            feature_map,
            rank,
            tikhonov_reg,
            regression: Regression::default(),
            fitted: None,
        }
    }

    pub fn with_regression(mut self, regression: Regression) -> Self {
        self.regression = regression;
        self
    }

    fn fitted(&self) -> Result<&PrimalFit, AppError> {
        self.fitted.as_ref().ok_or_else(|| AppError::not_fitted(NAME))
    }
}

impl<F: FeatureMap> KoopmanEstimator for ExtendedDmd<F> {
    fn name(&self) -> &str {
        NAME
    }

    fn fit(&mut self, batch: &ContextBatch) -> Result<(), AppError> {
        validate_low_rank(NAME, self.rank, self.tikhonov_reg, batch.len())?;
        let phi_x = self.feature_map.features(batch.inputs())?;
        let phi_y = self.feature_map.features(batch.outputs())?;
        let fit = PrimalFit::fit(
            &phi_x,
            &phi_y,
            batch.outputs(),
            self.rank,
            self.tikhonov_reg,
            self.regression,
        )?;
        tracing::debug!(n = batch.len(), features = phi_x.ncols(), train_risk = fit.train_risk, "fitted extended DMD");
        self.fitted = Some(fit);
        Ok(())
    }

    fn operator(&self) -> Result<&ReducedOperator, AppError> {
        Ok(&self.fitted()?.operator)
    }

    fn embed(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        fit.embed(&self.feature_map.features(inputs)?)
    }

    fn embed_left(&self, inputs: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        let fit = self.fitted()?;
        fit.embed_left(&self.feature_map.features(inputs)?)
    }

    fn readout_of(&self, values: &DMatrix<f64>) -> Result<DMatrix<f64>, AppError> {
        self.fitted()?.readout_of(values)
    }

    fn risk(&self, batch: Option<&ContextBatch>) -> Result<f64, AppError> {
        let fit = self.fitted()?;
        let Some(batch) = batch else {
            return Ok(fit.train_risk);
        };
        let phi_x = self.feature_map.features(batch.inputs())?;
        let phi_y = self.feature_map.features(batch.outputs())?;
        fit.risk(&phi_x, &phi_y)
    }
}
