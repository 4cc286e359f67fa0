//! SVG figures rendered with plotters.

use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::domain::SweepResults;
use crate::error::AppError;
use crate::plot::{Metric, final_spectrum, log_bounds, metric_series, spectrum_extent};

const SIZE: (u32, u32) = (900, 600);

fn palette(index: usize) -> RGBColor {
    const COLORS: [RGBColor; 6] = [
        RGBColor(31, 119, 180),
        RGBColor(255, 127, 14),
        RGBColor(44, 160, 44),
        RGBColor(214, 39, 40),
        RGBColor(148, 103, 189),
        RGBColor(140, 86, 75),
    ];
    COLORS[index % COLORS.len()]
}

fn draw_error(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::new(2, format!("Failed to write figure '{}': {e}", path.display()))
}

/// Log–log plot of one metric against the training size.
pub fn write_metric_svg(path: &Path, results: &SweepResults, metric: Metric) -> Result<(), AppError> {
    let series = metric_series(results, metric);
    let Some((x, y)) = log_bounds(&series) else {
        return Err(AppError::data(format!("No positive {} values to plot.", metric.label())));
    };

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} vs training size", metric.label()), ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d((x[0]..x[1]).log_scale(), (y[0]..y[1]).log_scale())
        .map_err(|e| draw_error(path, e))?;

    chart
        .configure_mesh()
        .x_desc("training windows")
        .y_desc(metric.label())
        .y_label_formatter(&|v| format!("{v:.1e}"))
        .draw()
        .map_err(|e| draw_error(path, e))?;

    for (i, s) in series.iter().enumerate() {
        let color = palette(i);
        chart
            .draw_series(LineSeries::new(s.points.iter().copied(), color.stroke_width(2)))
            .map_err(|e| draw_error(path, e))?
            .label(s.name.as_str())
            .legend(move |(lx, ly)| PathElement::new(vec![(lx, ly), (lx + 20, ly)], color.stroke_width(2)));
        chart
            .draw_series(s.points.iter().map(|&p| Circle::new(p, 3, color.filled())))
            .map_err(|e| draw_error(path, e))?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| draw_error(path, e))?;
    root.present().map_err(|e| draw_error(path, e))
}

/// Eigenvalues of every estimator at its largest size, with the unit circle.
pub fn write_spectrum_svg(path: &Path, results: &SweepResults) -> Result<(), AppError> {
    let spectra: Vec<(String, Vec<(f64, f64)>)> = results
        .series
        .iter()
        .filter_map(|s| final_spectrum(results, &s.name).map(|e| (s.name.clone(), e)))
        .collect();
    let all: Vec<(f64, f64)> = spectra.iter().flat_map(|(_, e)| e.iter().copied()).collect();
    let extent = spectrum_extent(&all);

    let root = SVGBackend::new(path, (700, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(path, e))?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Koopman eigenvalues", ("sans-serif", 22))
        .margin(12)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-extent..extent, -extent..extent)
        .map_err(|e| draw_error(path, e))?;

    chart
        .configure_mesh()
        .x_desc("Re λ")
        .y_desc("Im λ")
        .draw()
        .map_err(|e| draw_error(path, e))?;

    let circle = (0..=360).map(|deg| {
        let theta = (deg as f64).to_radians();
        (theta.cos(), theta.sin())
    });
    chart
        .draw_series(LineSeries::new(circle, BLACK.mix(0.5)))
        .map_err(|e| draw_error(path, e))?;

    for (i, (name, eigenvalues)) in spectra.iter().enumerate() {
        let color = palette(i);
        chart
            .draw_series(eigenvalues.iter().map(|&p| Circle::new(p, 4, color.filled())))
            .map_err(|e| draw_error(path, e))?
            .label(name.as_str())
            .legend(move |(lx, ly)| Circle::new((lx + 10, ly), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| draw_error(path, e))?;
    root.present().map_err(|e| draw_error(path, e))
}

/// Every figure of a sweep into `dir`; returns the written paths.
///
/// Metrics with nothing to show on log axes (e.g. an all-zero risk) are
/// skipped with a warning rather than failing the run.
pub fn write_sweep_figures(dir: &Path, results: &SweepResults) -> Result<Vec<PathBuf>, AppError> {
    fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create figure directory '{}': {e}", dir.display())))?;

    let mut written = Vec::new();
    for metric in Metric::ALL {
        let path = dir.join(format!("{}.svg", metric.file_stem()));
        match write_metric_svg(&path, results, metric) {
            Ok(()) => written.push(path),
            Err(e) if e.exit_code() == 3 => tracing::warn!(metric = metric.label(), "{e}"),
            Err(e) => return Err(e),
        }
    }
    let path = dir.join("eigenvalues.svg");
    write_spectrum_svg(&path, results)?;
    written.push(path);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::results::tests::sample_results;
    use tempfile::tempdir;

    #[test]
    fn writes_all_figures() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("figs");
        let written = write_sweep_figures(&out, &sample_results()).unwrap();
        assert_eq!(written.len(), 4);
        for path in &written {
            let svg = fs::read_to_string(path).unwrap();
            assert!(svg.starts_with("<svg"), "{}", path.display());
        }
        let rmse = fs::read_to_string(out.join("rmse.svg")).unwrap();
        assert!(rmse.contains("KernelDMD"));
    }

    #[test]
    fn metric_without_positive_values_is_skipped() {
        let dir = tempdir().unwrap();
        let mut results = sample_results();
        for s in &mut results.series {
            for p in &mut s.points {
                p.train_risk = 0.0;
            }
        }
        let written = write_sweep_figures(dir.path(), &results).unwrap();
        assert_eq!(written.len(), 3);
        assert!(!dir.path().join("train_risk.svg").exists());
    }
}
