//! Figures of a sweep: metric-vs-size curves and eigenvalue spectra.
//!
//! - `ascii`: fixed-size character grids for the terminal
//! - `svg`: plotters SVG files
//!
//! Both renderers share the data preparation below, so the terminal plot and
//! the SVG figure always show the same points.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{SweepPoint, SweepResults};

pub mod ascii;
pub mod svg;

pub use ascii::{render_metric_plot, render_spectrum_plot};
pub use svg::{write_metric_svg, write_spectrum_svg, write_sweep_figures};

/// Which sweep metric to plot against the training size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    FitTime,
    TrainRisk,
    Rmse,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::FitTime, Metric::TrainRisk, Metric::Rmse];

    pub fn label(self) -> &'static str {
        match self {
            Metric::FitTime => "fit time (s)",
            Metric::TrainRisk => "training risk",
            Metric::Rmse => "one-step rMSE",
        }
    }

    /// File stem of the SVG figure.
    pub fn file_stem(self) -> &'static str {
        match self {
            Metric::FitTime => "fit_time",
            Metric::TrainRisk => "train_risk",
            Metric::Rmse => "rmse",
        }
    }

    pub fn value(self, point: &SweepPoint) -> f64 {
        match self {
            Metric::FitTime => point.fit_time_secs,
            Metric::TrainRisk => point.train_risk,
            Metric::Rmse => point.rmse_onestep,
        }
    }
}

/// One named polyline of `(train_size, value)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub points: Vec<(f64, f64)>,
}

/// Metric series of every estimator, keeping only the points a log–log axis
/// can show (strictly positive and finite).
pub fn metric_series(results: &SweepResults, metric: Metric) -> Vec<Series> {
    results
        .series
        .iter()
        .map(|s| Series {
            name: s.name.clone(),
            points: s
                .points
                .iter()
                .map(|p| (p.train_size as f64, metric.value(p)))
                .filter(|&(x, y)| x > 0.0 && y > 0.0 && y.is_finite())
                .collect(),
        })
        .collect()
}

/// Data bounds `([x_min, x_max], [y_min, y_max])` over all series.
///
/// Degenerate spans are widened by a factor of ten on each side so that log
/// axes stay valid.
pub fn log_bounds(series: &[Series]) -> Option<([f64; 2], [f64; 2])> {
    let mut x = [f64::INFINITY, f64::NEG_INFINITY];
    let mut y = [f64::INFINITY, f64::NEG_INFINITY];
    for &(px, py) in series.iter().flat_map(|s| s.points.iter()) {
        x = [x[0].min(px), x[1].max(px)];
        y = [y[0].min(py), y[1].max(py)];
    }
    if !(x[0].is_finite() && y[0].is_finite()) {
        return None;
    }
    let widen = |b: [f64; 2]| if b[1] > b[0] { b } else { [b[0] / 10.0, b[1] * 10.0] };
    Some((widen(x), widen(y)))
}

/// Eigenvalues of the largest training size of one estimator.
pub fn final_spectrum(results: &SweepResults, estimator: &str) -> Option<Vec<(f64, f64)>> {
    let series = results.series(estimator)?;
    let last = series.points.iter().max_by_key(|p| p.train_size)?;
    Some(last.eigenvalues.iter().map(|&[re, im]| (re, im)).collect())
}

/// Half-width of a square window that holds the unit circle and all
/// eigenvalues, with a 10% margin.
pub fn spectrum_extent(eigenvalues: &[(f64, f64)]) -> f64 {
    let radius = eigenvalues
        .iter()
        .map(|&(re, im)| re.hypot(im))
        .filter(|r| r.is_finite())
        .fold(1.0_f64, f64::max);
    radius * 1.1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::results::tests::sample_results;

    #[test]
    fn metric_series_drop_non_positive_values() {
        let mut results = sample_results();
        results.series[0].points[0].train_risk = 0.0;
        let series = metric_series(&results, Metric::TrainRisk);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].points.len(), results.series[0].points.len() - 1);
        assert_eq!(series[1].points.len(), results.series[1].points.len());
    }

    #[test]
    fn bounds_cover_every_series() {
        let series = vec![
            Series {
                name: "a".into(),
                points: vec![(10.0, 2.0), (100.0, 1.0)],
            },
            Series {
                name: "b".into(),
                points: vec![(50.0, 5.0)],
            },
        ];
        let (x, y) = log_bounds(&series).unwrap();
        assert_eq!(x, [10.0, 100.0]);
        assert_eq!(y, [1.0, 5.0]);

        let single = vec![Series {
            name: "c".into(),
            points: vec![(100.0, 1.0)],
        }];
        let (x, y) = log_bounds(&single).unwrap();
        assert_eq!(x, [10.0, 1000.0]);
        assert_eq!(y, [0.1, 10.0]);
        assert!(log_bounds(&[]).is_none());
    }

    #[test]
    fn spectrum_window_holds_the_unit_circle() {
        assert!((spectrum_extent(&[(0.5, 0.1)]) - 1.1).abs() < 1e-12);
        assert!((spectrum_extent(&[(0.0, 2.0)]) - 2.2).abs() < 1e-12);
        let results = sample_results();
        let name = results.series[0].name.clone();
        assert!(final_spectrum(&results, &name).is_some());
        assert!(final_spectrum(&results, "missing").is_none());
    }
}
