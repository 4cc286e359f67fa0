//! Save and load fitted estimators (and other artifacts) as JSON.
//!
//! Every estimator serializes its configuration together with its fitted
//! state. Only the operator matrices are stored; the spectrum is recomputed on
//! load, so a restored estimator predicts, decomposes and forecasts exactly
//! like the original.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Write any serializable artifact as pretty JSON. `what` names it in errors.
pub fn save_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create {what} JSON '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| AppError::new(2, format!("Failed to write {what} JSON: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::new(2, format!("Failed to write {what} JSON: {e}")))
}

pub fn load_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open {what} JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AppError::new(2, format!("Invalid {what} JSON '{}': {e}", path.display())))
}

pub fn save_estimator<E: Serialize>(path: &Path, estimator: &E) -> Result<(), AppError> {
    save_json(path, estimator, "estimator")
}

pub fn load_estimator<E: DeserializeOwned>(path: &Path) -> Result<E, AppError> {
    load_json(path, "estimator")
}
