//! Ratatui-based viewer for saved sweep results.
//!
//! Shows one metric against the training size for every estimator (log–log),
//! or the eigenvalue spectrum of the selected estimator, with the final
//! standings beside it.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use plotters::style::RGBColor;
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
};

use crate::domain::SweepResults;
use crate::error::AppError;
use crate::io::read_results_json;
use crate::plot::{Metric, final_spectrum, log_bounds, metric_series, spectrum_extent};
use crate::report::{Standing, final_standings};

mod plotters_chart;

use plotters_chart::{ChartSeries, Mark, SweepPlottersChart};

/// Open the viewer on a results file.
pub fn run(path: &Path) -> Result<(), AppError> {
    let results = read_results_json(path)?;
    let mut app = App::new(results, path.to_path_buf());

    let _guard = TerminalGuard::new()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal =
        Terminal::new(backend).map_err(|e| AppError::new(4, format!("Failed to initialize terminal: {e}")))?;
    app.event_loop(&mut terminal)
}

/// Ensures the terminal is restored (raw mode, alternate screen) on exit.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Result<Self, AppError> {
        enable_raw_mode().map_err(|e| AppError::new(4, format!("Failed to enable raw mode: {e}")))?;
        if let Err(e) = execute!(io::stdout(), EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(AppError::new(4, format!("Failed to enter alternate screen: {e}")));
        }
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Metric(Metric),
    Spectrum,
}

impl View {
    fn next(self) -> Self {
        match self {
            View::Metric(Metric::FitTime) => View::Metric(Metric::TrainRisk),
            View::Metric(Metric::TrainRisk) => View::Metric(Metric::Rmse),
            View::Metric(Metric::Rmse) => View::Spectrum,
            View::Spectrum => View::Metric(Metric::FitTime),
        }
    }

    fn prev(self) -> Self {
        match self {
            View::Metric(Metric::FitTime) => View::Spectrum,
            View::Metric(Metric::TrainRisk) => View::Metric(Metric::FitTime),
            View::Metric(Metric::Rmse) => View::Metric(Metric::TrainRisk),
            View::Spectrum => View::Metric(Metric::Rmse),
        }
    }

    fn title(self) -> &'static str {
        match self {
            View::Metric(m) => m.label(),
            View::Spectrum => "eigenvalues",
        }
    }
}

struct App {
    results: SweepResults,
    path: PathBuf,
    standings: Vec<Standing>,
    view: View,
    selected: usize,
    status: String,
}

/// Chart-ready series, bounds and axis text for one view.
struct ChartData {
    series: Vec<ChartSeries>,
    x_bounds: [f64; 2],
    y_bounds: [f64; 2],
    x_label: &'static str,
    y_label: &'static str,
    fmt_x: fn(f64) -> String,
    fmt_y: fn(f64) -> String,
}

const COLORS: [RGBColor; 6] = [
    RGBColor(0, 255, 255),
    RGBColor(255, 165, 0),
    RGBColor(0, 255, 0),
    RGBColor(255, 0, 255),
    RGBColor(255, 255, 0),
    RGBColor(255, 80, 80),
];

impl App {
    fn new(results: SweepResults, path: PathBuf) -> Self {
        let standings = final_standings(&results);
        let status = format!("Loaded {}", path.display());
        Self {
            results,
            path,
            standings,
            view: View::Metric(Metric::Rmse),
            selected: 0,
            status,
        }
    }

    fn event_loop<B: ratatui::backend::Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<(), AppError> {
        let mut needs_redraw = true;
        loop {
            if needs_redraw {
                terminal
                    .draw(|f| self.draw(f))
                    .map_err(|e| AppError::new(4, format!("Terminal draw error: {e}")))?;
                needs_redraw = false;
            }

            if !event::poll(Duration::from_millis(100)).map_err(|e| AppError::new(4, format!("Event poll error: {e}")))? {
                continue;
            }

            match event::read().map_err(|e| AppError::new(4, format!("Event read error: {e}")))? {
                Event::Key(key) => {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    if self.handle_key(key.code)? {
                        break;
                    }
                    needs_redraw = true;
                }
                Event::Resize(_, _) => needs_redraw = true,
                _ => {}
            }
        }
        Ok(())
    }

    /// Returns `true` when the viewer should exit.
    fn handle_key(&mut self, code: KeyCode) -> Result<bool, AppError> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Right | KeyCode::Tab => {
                self.view = self.view.next();
                self.status = format!("view: {}", self.view.title());
            }
            KeyCode::Left | KeyCode::BackTab => {
                self.view = self.view.prev();
                self.status = format!("view: {}", self.view.title());
            }
            KeyCode::Up => self.selected = self.selected.saturating_sub(1),
            KeyCode::Down => {
                if self.selected + 1 < self.results.series.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Char('r') => {
                let results = read_results_json(&self.path)?;
                self.standings = final_standings(&results);
                self.results = results;
                self.selected = self.selected.min(self.results.series.len().saturating_sub(1));
                self.status = format!("Reloaded {}", self.path.display());
            }
            _ => {}
        }
        Ok(false)
    }

    fn selected_name(&self) -> Option<&str> {
        self.results.series.get(self.selected).map(|s| s.name.as_str())
    }

    fn chart_data(&self) -> Option<ChartData> {
        match self.view {
            View::Metric(metric) => metric_chart(&self.results, metric),
            View::Spectrum => spectrum_chart(&self.results, self.selected_name()?, self.selected),
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(4), Constraint::Min(0), Constraint::Length(3)])
            .split(frame.area());

        self.draw_header(frame, chunks[0]);
        self.draw_body(frame, chunks[1]);
        self.draw_footer(frame, chunks[2]);
    }

    fn draw_header(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let s = &self.results.scenario;
        let lines = vec![
            Line::from(vec![
                Span::styled("koop", Style::default().fg(Color::Cyan)),
                Span::raw(format!(" | {:?} sweep | {}", s.system, self.view.title())),
            ]),
            Line::from(Span::styled(
                format!(
                    "windows: train={} test={} | kernel {} | rank={} | tikhonov={:.1e}",
                    s.n_train_windows,
                    s.n_test_windows,
                    s.kernel.name(),
                    s.rank,
                    s.tikhonov_reg
                ),
                Style::default().fg(Color::Gray),
            )),
        ];
        let p = Paragraph::new(Text::from(lines)).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }

    fn draw_body(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(44)])
            .split(area);

        self.draw_chart(frame, chunks[0]);
        self.draw_standings(frame, chunks[1]);
    }

    fn draw_chart(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let block = Block::default().title(self.view.title()).borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        frame.render_widget(Clear, inner);

        let Some(data) = self.chart_data() else {
            let msg = Paragraph::new("Nothing to plot for this view.").style(Style::default().fg(Color::Yellow));
            frame.render_widget(msg, inner);
            return;
        };

        let widget = SweepPlottersChart {
            series: &data.series,
            x_bounds: data.x_bounds,
            y_bounds: data.y_bounds,
            x_label: data.x_label,
            y_label: data.y_label,
            fmt_x: data.fmt_x,
            fmt_y: data.fmt_y,
        };
        frame.render_widget(widget, inner);
    }

    fn draw_standings(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let items: Vec<ListItem> = self
            .results
            .series
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let detail = self
                    .standings
                    .iter()
                    .find(|st| st.name == s.name)
                    .map(|st| format!("n={} rmse={:.3e} t={:.3}s", st.train_size, st.rmse_onestep, st.fit_time_secs))
                    .unwrap_or_else(|| "no points".to_string());
                let c = COLORS[i % COLORS.len()];
                ListItem::new(vec![
                    Line::from(Span::styled(s.name.clone(), Style::default().fg(Color::Rgb(c.0, c.1, c.2)))),
                    Line::from(Span::styled(format!("  {detail}"), Style::default().fg(Color::Gray))),
                ])
            })
            .collect();

        let list = List::new(items)
            .block(Block::default().title("Estimators").borders(Borders::ALL))
            .highlight_style(Style::default().fg(Color::Black).bg(Color::White))
            .highlight_symbol("» ");

        let mut state = ListState::default();
        state.select(Some(self.selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_footer(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let help = "←/→ view  ↑/↓ estimator  r reload  q quit";
        let line = Line::from(vec![
            Span::styled(help, Style::default().fg(Color::Gray)),
            Span::raw(" | "),
            Span::styled(&self.status, Style::default().fg(Color::Yellow)),
        ]);
        let p = Paragraph::new(line).block(Block::default().borders(Borders::ALL));
        frame.render_widget(p, area);
    }
}

/// Metric series in log10 coordinates, so the linear chart reads as log–log.
fn metric_chart(results: &SweepResults, metric: Metric) -> Option<ChartData> {
    let series = metric_series(results, metric);
    let (x, y) = log_bounds(&series)?;
    let x_bounds = [x[0].log10(), x[1].log10()];
    let pad = ((y[1].log10() - y[0].log10()) * 0.05).max(1e-6);
    let y_bounds = [y[0].log10() - pad, y[1].log10() + pad];

    let mut chart = Vec::with_capacity(2 * series.len());
    for (i, s) in series.iter().enumerate() {
        let points: Vec<(f64, f64)> = s.points.iter().map(|&(x, y)| (x.log10(), y.log10())).collect();
        let color = COLORS[i % COLORS.len()];
        chart.push(ChartSeries {
            points: points.clone(),
            color,
            mark: Mark::Line,
        });
        chart.push(ChartSeries {
            points,
            color,
            mark: Mark::Dots,
        });
    }

    Some(ChartData {
        series: chart,
        x_bounds,
        y_bounds,
        x_label: "train size",
        y_label: metric.label(),
        fmt_x: fmt_pow10_int,
        fmt_y: fmt_pow10_sci,
    })
}

fn spectrum_chart(results: &SweepResults, estimator: &str, index: usize) -> Option<ChartData> {
    let eigenvalues = final_spectrum(results, estimator)?;
    let extent = spectrum_extent(&eigenvalues);
    let circle = (0..=180)
        .map(|k| {
            let theta = 2.0 * std::f64::consts::PI * k as f64 / 180.0;
            (theta.cos(), theta.sin())
        })
        .collect();

    Some(ChartData {
        series: vec![
            ChartSeries {
                points: circle,
                color: RGBColor(128, 128, 128),
                mark: Mark::Line,
            },
            ChartSeries {
                points: eigenvalues,
                color: COLORS[index % COLORS.len()],
                mark: Mark::Dots,
            },
        ],
        x_bounds: [-extent, extent],
        y_bounds: [-extent, extent],
        x_label: "Re",
        y_label: "Im",
        fmt_x: fmt_linear,
        fmt_y: fmt_linear,
    })
}

fn fmt_pow10_int(v: f64) -> String {
    format!("{:.0}", 10f64.powf(v))
}

fn fmt_pow10_sci(v: f64) -> String {
    format!("{:.0e}", 10f64.powf(v))
}

fn fmt_linear(v: f64) -> String {
    format!("{v:.2}")
}
