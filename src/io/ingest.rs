//! Trajectory CSV ingest.
//!
//! Turns a CSV with one row per time step into a [`Trajectory`]:
//! - a header row is required; names are matched case-insensitively
//! - `t`, `time` and `step` columns are treated as an index and skipped
//! - by default every other column is a state dimension; `columns` selects a subset
//!
//! Rows cannot be skipped without breaking the time structure, so any invalid
//! row fails the whole ingest (exit code 3) with the offending lines listed.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;

use crate::data::Trajectory;
use crate::error::AppError;

const INDEX_COLUMNS: [&str; 3] = ["t", "time", "step"];

/// How many row errors are quoted in the failure message.
const MAX_REPORTED_ROW_ERRORS: usize = 5;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// Ingest output: the trajectory and the names of its state columns.
#[derive(Debug, Clone)]
pub struct TrajectoryIngest {
    pub trajectory: Trajectory,
    pub columns: Vec<String>,
    pub rows_read: usize,
}

/// Load a trajectory CSV.
pub fn load_trajectory_csv(path: &Path, columns: Option<&[String]>) -> Result<TrajectoryIngest, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open CSV '{}': {e}", path.display())))?;

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    let selected = resolve_columns(&headers, &header_map, columns)?;

    let mut rows = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header, lines are 1-based.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        match parse_row(&record, &selected) {
            Ok(row) => rows.push(row),
            Err(message) => row_errors.push(RowError { line, message }),
        }
    }

    if !row_errors.is_empty() {
        let shown: Vec<String> = row_errors
            .iter()
            .take(MAX_REPORTED_ROW_ERRORS)
            .map(|e| format!("line {}: {}", e.line, e.message))
            .collect();
        return Err(AppError::new(
            3,
            format!(
                "{} of {rows_read} CSV rows are invalid ({}).",
                row_errors.len(),
                shown.join("; ")
            ),
        ));
    }
    if rows.is_empty() {
        return Err(AppError::new(3, "The trajectory CSV has no data rows."));
    }

    let trajectory = Trajectory::from_rows(&rows)?;
    tracing::debug!(rows = rows_read, dim = selected.len(), "loaded trajectory CSV");

    Ok(TrajectoryIngest {
        trajectory,
        columns: selected.into_iter().map(|(name, _)| name).collect(),
        rows_read,
    })
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn resolve_columns(
    headers: &StringRecord,
    header_map: &HashMap<String, usize>,
    requested: Option<&[String]>,
) -> Result<Vec<(String, usize)>, AppError> {
    let selected: Vec<(String, usize)> = match requested {
        Some(names) => names
            .iter()
            .map(|name| {
                let key = normalize_header_name(name);
                header_map
                    .get(&key)
                    .map(|&idx| (key.clone(), idx))
                    .ok_or_else(|| AppError::new(2, format!("Missing requested column: `{name}`")))
            })
            .collect::<Result<_, _>>()?,
        None => headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (normalize_header_name(name), idx))
            .filter(|(name, _)| !INDEX_COLUMNS.contains(&name.as_str()))
            .collect(),
    };

    if selected.is_empty() {
        return Err(AppError::new(2, "The trajectory CSV has no state columns."));
    }
    Ok(selected)
}

fn parse_row(record: &StringRecord, columns: &[(String, usize)]) -> Result<Vec<f64>, String> {
    columns
        .iter()
        .map(|(name, idx)| {
            let raw = record
                .get(*idx)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| format!("Missing `{name}` value."))?;
            let v: f64 = raw
                .parse()
                .map_err(|_| format!("Invalid `{name}` value '{raw}'."))?;
            if v.is_finite() {
                Ok(v)
            } else {
                Err(format!("Non-finite `{name}` value."))
            }
        })
        .collect()
}
