//! Reporting utilities: final standings, rankings and formatted terminal output.

use std::cmp::Ordering;

use crate::domain::SweepResults;

pub mod format;

pub use format::*;

/// Metrics of one estimator at its largest training size.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub name: String,
    pub train_size: usize,
    pub fit_time_secs: f64,
    pub train_risk: f64,
    pub rmse_onestep: f64,
    pub spectral_radius: f64,
}

/// Estimators ordered by accuracy and by speed.
#[derive(Debug, Clone)]
pub struct Rankings {
    pub by_rmse: Vec<Standing>,
    pub by_fit_time: Vec<Standing>,
}

/// Last point (largest training size) of every non-empty series.
pub fn final_standings(results: &SweepResults) -> Vec<Standing> {
    results
        .series
        .iter()
        .filter_map(|s| {
            let p = s.points.iter().max_by_key(|p| p.train_size)?;
            Some(Standing {
                name: s.name.clone(),
                train_size: p.train_size,
                fit_time_secs: p.fit_time_secs,
                train_risk: p.train_risk,
                rmse_onestep: p.rmse_onestep,
                spectral_radius: p.spectral_radius(),
            })
        })
        .collect()
}

pub fn rank_estimators(results: &SweepResults) -> Rankings {
    let standings = final_standings(results);

    let mut by_rmse = standings.clone();
    by_rmse.sort_by(|a, b| a.rmse_onestep.partial_cmp(&b.rmse_onestep).unwrap_or(Ordering::Equal));

    let mut by_fit_time = standings;
    by_fit_time.sort_by(|a, b| a.fit_time_secs.partial_cmp(&b.fit_time_secs).unwrap_or(Ordering::Equal));

    Rankings { by_rmse, by_fit_time }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::results::tests::sample_results;

    #[test]
    fn standings_use_the_largest_size() {
        let standings = final_standings(&sample_results());
        assert_eq!(standings.len(), 2);
        assert!(standings.iter().all(|s| s.train_size == 1000));
        assert!((standings[0].rmse_onestep - 0.01).abs() < 1e-12);
        assert!((standings[0].spectral_radius - 1.0).abs() < 1e-12);
    }

    #[test]
    fn rankings_sort_ascending() {
        let rankings = rank_estimators(&sample_results());
        assert_eq!(rankings.by_rmse[0].name, "KernelDMD");
        assert_eq!(rankings.by_fit_time[0].name, "Nystroem");
    }

    #[test]
    fn empty_series_are_skipped() {
        let mut results = sample_results();
        results.series[1].points.clear();
        assert_eq!(final_standings(&results).len(), 1);
    }
}
