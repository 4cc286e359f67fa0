//! ASCII plotting for terminal output.
//!
//! Fixed-size character grids, deterministic so they can be golden-tested.
//!
//! Plot elements:
//! - metric plots: one letter per estimator (`a`, `b`, ...) at the measured
//!   sizes, joined by `-`, on log–log axes
//! - spectrum plots: the unit circle as `.`, eigenvalues as `*`

use crate::domain::SweepResults;
use crate::plot::{Metric, final_spectrum, log_bounds, metric_series, spectrum_extent};

/// Metric against training size for every estimator of a sweep.
pub fn render_metric_plot(results: &SweepResults, metric: Metric, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let series = metric_series(results, metric);

    let Some((x_bounds, y_bounds)) = log_bounds(&series) else {
        return format!("{} vs train size: no positive values to plot\n", metric.label());
    };
    let (lx_min, lx_max) = (x_bounds[0].log10(), x_bounds[1].log10());
    let (ly_min, ly_max) = pad_range(y_bounds[0].log10(), y_bounds[1].log10(), 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Lines first so the markers overlay them.
    for s in &series {
        let cells: Vec<(usize, usize)> = s
            .points
            .iter()
            .map(|&(x, y)| {
                (
                    map_x(x.log10(), lx_min, lx_max, width),
                    map_y(y.log10(), ly_min, ly_max, height),
                )
            })
            .collect();
        for pair in cells.windows(2) {
            draw_line(&mut grid, pair[0], pair[1], '-');
        }
    }
    for (i, s) in series.iter().enumerate() {
        let marker = marker(i);
        for &(x, y) in &s.points {
            let col = map_x(x.log10(), lx_min, lx_max, width);
            let row = map_y(y.log10(), ly_min, ly_max, height);
            grid[row][col] = marker;
        }
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{} vs train size | x=[{:.0}, {:.0}] | y=[{:.3e}, {:.3e}]\n",
        metric.label(),
        x_bounds[0],
        x_bounds[1],
        y_bounds[0],
        y_bounds[1]
    ));
    push_grid(&mut out, grid);
    for (i, s) in series.iter().enumerate() {
        out.push_str(&format!("{}: {}\n", marker(i), s.name));
    }
    out
}

/// Eigenvalues of one estimator at its largest training size.
pub fn render_spectrum_plot(results: &SweepResults, estimator: &str, width: usize, height: usize) -> String {
    let Some(eigenvalues) = final_spectrum(results, estimator) else {
        return format!("No spectrum for '{estimator}'.\n");
    };
    render_eigenvalues(estimator, &eigenvalues, width, height)
}

fn render_eigenvalues(name: &str, eigenvalues: &[(f64, f64)], width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);
    let extent = spectrum_extent(eigenvalues);

    let mut grid = vec![vec![' '; width]; height];
    let steps = 8 * (width + height);
    for k in 0..steps {
        let theta = 2.0 * std::f64::consts::PI * k as f64 / steps as f64;
        let col = map_x(theta.cos(), -extent, extent, width);
        let row = map_y(theta.sin(), -extent, extent, height);
        grid[row][col] = '.';
    }
    for &(re, im) in eigenvalues {
        if re.is_finite() && im.is_finite() {
            grid[map_y(im, -extent, extent, height)][map_x(re, -extent, extent, width)] = '*';
        }
    }

    let radius = eigenvalues.iter().map(|&(re, im)| re.hypot(im)).fold(0.0_f64, f64::max);
    let mut out = format!(
        "Eigenvalues of {name}: n={} | max |λ|={radius:.4} | window=[{:.2}, {:.2}]²\n",
        eigenvalues.len(),
        -extent,
        extent
    );
    push_grid(&mut out, grid);
    out
}

fn marker(index: usize) -> char {
    (b'a' + (index % 26) as u8) as char
}

fn push_grid(out: &mut String, grid: Vec<Vec<char>>) {
    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // Row 0 is the top.
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Bresenham line that only paints blank cells.
fn draw_line(grid: &mut [Vec<char>], from: (usize, usize), to: (usize, usize), ch: char) {
    let (mut x0, mut y0) = (from.0 as isize, from.1 as isize);
    let (x1, y1) = (to.0 as isize, to.1 as isize);

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EstimatorSeries, SweepPoint};
    use crate::io::results::tests::sample_results;

    fn one_series(values: &[(usize, f64)]) -> SweepResults {
        let mut results = sample_results();
        results.series = vec![EstimatorSeries {
            name: "KernelDMD".to_string(),
            description: String::new(),
            points: values
                .iter()
                .map(|&(n, t)| SweepPoint {
                    train_size: n,
                    fit_time_secs: t,
                    train_risk: t,
                    rmse_onestep: t,
                    eigenvalues: vec![[1.0, 0.0], [0.0, 0.0]],
                })
                .collect(),
        }];
        results
    }

    #[test]
    fn metric_plot_golden_snapshot_small() {
        let results = one_series(&[(10, 1.0), (100, 10.0), (1000, 100.0)]);
        let txt = render_metric_plot(&results, Metric::FitTime, 10, 5);
        let expected = concat!(
            "fit time (s) vs train size | x=[10, 1000] | y=[1.000e0, 1.000e2]\n",
            "        -a\n",
            "      --  \n",
            "    -a    \n",
            "  --      \n",
            "a-        \n",
            "a: KernelDMD\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn every_estimator_gets_a_marker_and_legend() {
        let txt = render_metric_plot(&sample_results(), Metric::Rmse, 40, 12);
        assert!(txt.contains("a: KernelDMD\n"));
        assert!(txt.contains("b: Nystroem\n"));
        // Header, 12 rows, 2 legend lines.
        assert_eq!(txt.lines().count(), 15);
    }

    #[test]
    fn nothing_positive_to_plot() {
        let results = one_series(&[(10, 0.0)]);
        let txt = render_metric_plot(&results, Metric::TrainRisk, 20, 5);
        assert!(txt.contains("no positive values"));
    }

    #[test]
    fn spectrum_marks_eigenvalues_inside_the_circle() {
        let results = one_series(&[(10, 1.0)]);
        let txt = render_spectrum_plot(&results, "KernelDMD", 21, 11);
        let rows: Vec<&str> = txt.lines().skip(1).collect();
        assert_eq!(rows.len(), 11);
        // λ = 1 sits on the circle's right edge, λ = 0 in the centre.
        assert_eq!(rows[5].chars().nth(19), Some('*'));
        assert_eq!(rows[5].chars().nth(10), Some('*'));
        assert!(rows[0].contains('.') || rows[1].contains('.'));
        assert!(txt.starts_with("Eigenvalues of KernelDMD: n=2"));
        assert!(render_spectrum_plot(&results, "nope", 21, 11).starts_with("No spectrum"));
    }
}
