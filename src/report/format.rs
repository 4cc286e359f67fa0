//! Formatted terminal output for sweeps and training runs.
//!
//! Formatting lives in one place so the numerical code stays free of
//! presentation concerns and output changes stay localized.

use crate::config::VampnetConfig;
use crate::domain::{EstimatorSeries, SweepResults, TrainingHistory};
use crate::report::{Rankings, Standing};

/// Scenario header plus one metrics table per estimator.
pub fn format_sweep_summary(results: &SweepResults) -> String {
    let s = &results.scenario;
    let mut out = String::new();

    out.push_str("=== koop - Koopman estimator sweep ===\n");
    out.push_str(&format!(
        "System: {:?} | states={} | windows: train={} test={} | context={}\n",
        s.system, s.n_states, s.n_train_windows, s.n_test_windows, s.context_len
    ));
    out.push_str(&format!(
        "Kernel: {} | rank={} | tikhonov={:.1e} | seed={}\n",
        s.kernel.name(),
        s.rank,
        s.tikhonov_reg,
        s.seed
    ));
    out.push_str(&format!("Created: {}\n", results.created_at.format("%Y-%m-%d %H:%M:%S UTC")));

    for series in &results.series {
        out.push('\n');
        out.push_str(&format!("{} ({})\n", series.name, series.description));
        out.push_str(&format_series_table(series));
    }
    out
}

fn format_series_table(series: &EstimatorSeries) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!(
            "{:>8} {:>12} {:>12} {:>12} {:>8}",
            "size", "fit_time_s", "train_risk", "rmse", "|λ|max"
        ),
    );
    push_row(&mut out, format!("{:-<8} {:-<12} {:-<12} {:-<12} {:-<8}", "", "", "", "", ""));
    for p in &series.points {
        push_row(
            &mut out,
            format!(
                "{:>8} {:>12.4} {:>12.4e} {:>12.4e} {:>8.4}",
                p.train_size,
                p.fit_time_secs,
                p.train_risk,
                p.rmse_onestep,
                p.spectral_radius()
            ),
        );
    }
    out
}

/// Estimators at their largest size, most accurate and fastest first.
pub fn format_rankings(rankings: &Rankings) -> String {
    let mut out = String::new();
    out.push_str("Most accurate (one-step rMSE):\n");
    out.push_str(&format_standings(&rankings.by_rmse));
    out.push('\n');
    out.push_str("Fastest (fit time):\n");
    out.push_str(&format_standings(&rankings.by_fit_time));
    out
}

fn format_standings(rows: &[Standing]) -> String {
    let mut out = String::new();
    push_row(
        &mut out,
        format!("{:<16} {:>8} {:>12} {:>12}", "estimator", "size", "rmse", "fit_time_s"),
    );
    push_row(&mut out, format!("{:-<16} {:-<8} {:-<12} {:-<12}", "", "", "", ""));
    for r in rows {
        push_row(
            &mut out,
            format!(
                "{:<16} {:>8} {:>12.4e} {:>12.4}",
                truncate(&r.name, 16),
                r.train_size,
                r.rmse_onestep,
                r.fit_time_secs
            ),
        );
    }
    out
}

/// Settings of a VAMPNet run and its per-epoch history.
///
/// Epochs without an evaluation show `-` in the accuracy column.
pub fn format_training_summary(history: &TrainingHistory, config: &VampnetConfig) -> String {
    let mut out = String::new();
    out.push_str("=== koop - VAMPNet on ordered MNIST ===\n");
    out.push_str(&format!(
        "Data: {} | classes={} | train={} val={} | context={}\n",
        if config.synthetic { "synthetic glyphs" } else { "MNIST" },
        config.classes,
        config.n_train,
        config.n_val,
        config.context_len
    ));
    out.push_str(&format!(
        "Encoder: {} channels -> {} features | {:?} lr={:.1e} | batch={} | seed={}\n",
        config.channels,
        config.feature_dim,
        config.optimizer,
        config.learning_rate,
        config.batch_size,
        config.seed
    ));
    out.push('\n');

    push_row(&mut out, format!("{:>6} {:>12} {:>10}", "epoch", "vamp2", "accuracy"));
    push_row(&mut out, format!("{:-<6} {:-<12} {:-<10}", "", "", ""));
    for m in &history.epochs {
        let acc = m.val_accuracy.map_or_else(|| "-".to_string(), |a| format!("{a:.4}"));
        push_row(&mut out, format!("{:>6} {:>12.6} {:>10}", m.epoch, m.train_score, acc));
    }

    match history.best_accuracy() {
        Some((epoch, acc)) => out.push_str(&format!("\nBest accuracy: {acc:.4} (epoch {epoch})\n")),
        None => out.push_str("\nNo evaluation ran.\n"),
    }
    out
}

fn push_row(out: &mut String, row: String) {
    out.push_str(row.trim_end());
    out.push('\n');
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EpochMetrics;
    use crate::io::results::tests::sample_results;
    use crate::report::rank_estimators;

    #[test]
    fn sweep_summary_lists_every_point() {
        let txt = format_sweep_summary(&sample_results());
        assert!(txt.starts_with("=== koop - Koopman estimator sweep ===\n"));
        assert!(txt.contains("System: Lorenz63 | states=1100 | windows: train=1000 test=100 | context=2\n"));
        assert!(txt.contains("Created: 2026-01-02 03:04:05 UTC\n"));
        assert!(txt.contains("KernelDMD (kernel rrr, full)\n"));
        assert!(txt.contains("Nystroem (nystroem rrr, 250 centers)\n"));
        let rows = txt.lines().filter(|l| l.trim_start().starts_with("1000 ")).count();
        assert_eq!(rows, 2);
        assert!(txt.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn rankings_table_order() {
        let txt = format_rankings(&rank_estimators(&sample_results()));
        let fastest = txt.split("Fastest").nth(1).unwrap();
        let first_row = fastest.lines().nth(3).unwrap();
        assert!(first_row.starts_with("Nystroem"));
    }

    #[test]
    fn training_summary_marks_skipped_evaluations() {
        let mut history = TrainingHistory::default();
        for epoch in 1..=2 {
            history.push(EpochMetrics {
                epoch,
                train_score: 1.5,
                val_accuracy: None,
            });
        }
        history.set_accuracy(2, 0.8);
        let config = VampnetConfig {
            synthetic: true,
            ..VampnetConfig::default()
        };
        let txt = format_training_summary(&history, &config);
        assert!(txt.contains("synthetic glyphs"));
        assert!(txt.contains("     1     1.500000          -\n"));
        assert!(txt.contains("     2     1.500000     0.8000\n"));
        assert!(txt.contains("Best accuracy: 0.8000 (epoch 2)"));
    }

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }
}
