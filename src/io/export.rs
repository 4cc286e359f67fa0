//! CSV exports: sweep metrics, training history and generated trajectories.
//!
//! The exports are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::data::Trajectory;
use crate::domain::{SweepResults, TrainingHistory};
use crate::error::AppError;

/// One row per (estimator, training size).
pub fn write_sweep_csv(path: &Path, results: &SweepResults) -> Result<(), AppError> {
    let mut file = create(path, "sweep CSV")?;

    writeln!(
        file,
        "estimator,train_size,fit_time_secs,train_risk,rmse_onestep,spectral_radius,n_eigenvalues"
    )
    .map_err(|e| AppError::new(2, format!("Failed to write sweep CSV header: {e}")))?;

    for series in &results.series {
        for p in &series.points {
            writeln!(
                file,
                "{},{},{:.6},{:.10e},{:.10e},{:.10},{}",
                series.name,
                p.train_size,
                p.fit_time_secs,
                p.train_risk,
                p.rmse_onestep,
                p.spectral_radius(),
                p.eigenvalues.len(),
            )
            .map_err(|e| AppError::new(2, format!("Failed to write sweep CSV row: {e}")))?;
        }
    }

    file.flush()
        .map_err(|e| AppError::new(2, format!("Failed to write sweep CSV: {e}")))
}

/// One row per epoch; `val_accuracy` is empty on epochs without an evaluation.
pub fn write_history_csv(path: &Path, history: &TrainingHistory) -> Result<(), AppError> {
    let mut file = create(path, "history CSV")?;

    writeln!(file, "epoch,train_score,val_accuracy")
        .map_err(|e| AppError::new(2, format!("Failed to write history CSV header: {e}")))?;

    for m in &history.epochs {
        writeln!(
            file,
            "{},{:.10},{}",
            m.epoch,
            m.train_score,
            m.val_accuracy.map(|a| format!("{a:.6}")).unwrap_or_default(),
        )
        .map_err(|e| AppError::new(2, format!("Failed to write history CSV row: {e}")))?;
    }

    file.flush()
        .map_err(|e| AppError::new(2, format!("Failed to write history CSV: {e}")))
}

/// Write a trajectory in the layout `load_trajectory_csv` reads back.
pub fn write_trajectory_csv(path: &Path, trajectory: &Trajectory, columns: &[String]) -> Result<(), AppError> {
    if columns.len() != trajectory.dim() {
        return Err(AppError::new(
            2,
            format!(
                "{} column names given for a {}-dimensional trajectory.",
                columns.len(),
                trajectory.dim()
            ),
        ));
    }
    let mut file = create(path, "trajectory CSV")?;

    writeln!(file, "t,{}", columns.join(","))
        .map_err(|e| AppError::new(2, format!("Failed to write trajectory CSV header: {e}")))?;

    for (t, row) in trajectory.states().row_iter().enumerate() {
        let values: Vec<String> = row.iter().map(|v| format!("{v:e}")).collect();
        writeln!(file, "{t},{}", values.join(","))
            .map_err(|e| AppError::new(2, format!("Failed to write trajectory CSV row: {e}")))?;
    }

    file.flush()
        .map_err(|e| AppError::new(2, format!("Failed to write trajectory CSV: {e}")))
}

fn create(path: &Path, what: &str) -> Result<BufWriter<File>, AppError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| AppError::new(2, format!("Failed to create {what} '{}': {e}", path.display())))
}
