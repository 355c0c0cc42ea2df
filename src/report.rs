use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{fmt::Debug, io};

use crate::{
    aggregate::{Aggregate, Summary},
    error::{FailureKind, HarnessError},
    metric::{Metric, MetricRequest, TrialResult},
};

/// A [`Report`] is the processed form of an [`Aggregate`].
///
/// Reports turn raw aggregated data into final numbers such as means and
/// spreads. They are plain data: no I/O, built from the aggregate with
/// [`From`], and handed to a [`Reporter`] for output.
pub trait Report<A>
where
    Self: Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// Per (operation, metric) statistics over all measured trials.
///
/// `std_dev` is the sample standard deviation, and `0.0` when there was only one
/// trial.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl From<Summary> for AggregateResult {
    fn from(value: Summary) -> Self {
        if value.count == 0 {
            return Self {
                count: 0,
                mean: 0.0,
                std_dev: 0.0,
                min: 0.0,
                max: 0.0,
            };
        }
        let std_dev = if value.count > 1 {
            (value.m2 / (value.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        Self {
            count: value.count,
            mean: value.mean,
            std_dev,
            min: value.min,
            max: value.max,
        }
    }
}

impl Report<Summary> for AggregateResult {}

/// Terminal state of one operation within a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Aggregated,
    Failed { kind: FailureKind, reason: String },
}

/// Statistics for one metric of one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: Metric,
    #[serde(flatten)]
    pub result: AggregateResult,
}

/// One operation's line in a [`ComparisonReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub label: String,
    #[serde(flatten)]
    pub status: RowStatus,
    /// One entry per requested metric, in request order. Empty for failed rows.
    pub results: Vec<MetricResult>,
}

impl Row {
    pub(crate) fn aggregated(label: String, request: &MetricRequest, trials: &[TrialResult]) -> Self {
        let results = request
            .metrics()
            .iter()
            .map(|&metric| {
                let mut summary = Summary::new();
                trials
                    .iter()
                    .filter(|t| t.metric() == metric)
                    .for_each(|t| summary.consume(&t.value()));
                MetricResult {
                    metric,
                    result: summary.into(),
                }
            })
            .collect();
        Self {
            label,
            status: RowStatus::Aggregated,
            results,
        }
    }

    pub(crate) fn failed(label: String, error: &HarnessError) -> Self {
        Self {
            label,
            status: RowStatus::Failed {
                kind: error.failure_kind().unwrap_or(FailureKind::Operation),
                reason: error.to_string(),
            },
            results: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, RowStatus::Failed { .. })
    }

    pub fn get(&self, metric: Metric) -> Option<&AggregateResult> {
        self.results
            .iter()
            .find(|r| r.metric == metric)
            .map(|r| &r.result)
    }
}

/// Side-by-side results of a comparison, one row per operation in the order
/// the operations were given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub title: String,
    pub metrics: Vec<Metric>,
    pub rows: Vec<Row>,
}

impl ComparisonReport {
    pub fn labels(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.label.as_str()).collect()
    }

    pub fn row(&self, label: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.label == label)
    }

    pub fn get(&self, label: &str, metric: Metric) -> Option<&AggregateResult> {
        self.row(label).and_then(|r| r.get(metric))
    }

    pub fn failed(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|r| r.is_failed())
    }

    /// Render with [`TableReporter`].
    pub fn to_markdown(&self) -> String {
        TableReporter.render(self)
    }
}

/// A [`Reporter`] writes a [`ComparisonReport`] to a caller-supplied sink.
///
/// Reporters are the only I/O boundary of the harness; measuring and
/// aggregating never print anything.
pub trait Reporter {
    fn report(&self, report: &ComparisonReport, sink: &mut dyn io::Write) -> io::Result<()>;
}

/// Unit chosen for the elapsed-time column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Microseconds,
    Nanoseconds,
}

impl TimeUnit {
    /// Pick the largest unit in which the fastest row still reads above 10.
    pub fn for_fastest(nanos: f64) -> Self {
        [TimeUnit::Milliseconds, TimeUnit::Microseconds]
            .into_iter()
            .find(|unit| nanos > unit.nanos() * 10.0)
            .unwrap_or(TimeUnit::Nanoseconds)
    }

    pub fn nanos(self) -> f64 {
        match self {
            TimeUnit::Milliseconds => 1_000_000.0,
            TimeUnit::Microseconds => 1_000.0,
            TimeUnit::Nanoseconds => 1.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Nanoseconds => "nanoseconds",
        }
    }
}

/// Markdown table with one row per operation and one column per metric.
///
/// Cells read `mean ± std_dev`. Elapsed time is scaled to a common unit picked
/// from the fastest operation and rounded to whole numbers; counts get
/// thousands separators; percentages keep one decimal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableReporter;

impl TableReporter {
    pub fn render(&self, report: &ComparisonReport) -> String {
        let unit = report
            .rows
            .iter()
            .filter_map(|r| r.get(Metric::ElapsedTime))
            .map(|r| r.mean)
            .reduce(f64::min)
            .map(TimeUnit::for_fastest)
            .unwrap_or(TimeUnit::Nanoseconds);

        let mut header = vec!["Operation".to_owned()];
        header.extend(report.metrics.iter().map(|&m| match m {
            Metric::ElapsedTime => format!("Elapsed {}", unit.name()),
            other => other.header().to_owned(),
        }));

        let body: Vec<Vec<String>> = report
            .rows
            .iter()
            .map(|row| {
                let mut cells = vec![format!("`{}`", escape_cell(&row.label))];
                match &row.status {
                    RowStatus::Aggregated => {
                        cells.extend(report.metrics.iter().map(|&m| match row.get(m) {
                            Some(r) => format_cell(m, r, unit),
                            None => "-".to_owned(),
                        }));
                    }
                    RowStatus::Failed { reason, .. } => {
                        cells.push(format!("FAILED: {}", escape_cell(reason)));
                        cells.extend(report.metrics.iter().skip(1).map(|_| "-".to_owned()));
                    }
                }
                cells
            })
            .collect();

        let widths: Vec<usize> = (0..header.len())
            .map(|col| {
                body.iter()
                    .map(|cells| cells[col].chars().count())
                    .chain([header[col].chars().count(), 3])
                    .max()
                    .unwrap_or(3)
            })
            .collect();

        let mut out = String::new();
        push_line(&mut out, &header, &widths);
        let rule: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(col, &w)| {
                if col == 0 {
                    format!(":{}", "-".repeat(w - 1))
                } else {
                    format!("{}:", "-".repeat(w - 1))
                }
            })
            .collect();
        push_line(&mut out, &rule, &widths);
        for cells in &body {
            push_line(&mut out, cells, &widths);
        }
        out
    }
}

impl Reporter for TableReporter {
    fn report(&self, report: &ComparisonReport, sink: &mut dyn io::Write) -> io::Result<()> {
        if !report.title.is_empty() {
            writeln!(sink, "## {}\n", report.title)?;
        }
        sink.write_all(self.render(report).as_bytes())
    }
}

fn push_line(out: &mut String, cells: &[String], widths: &[usize]) {
    out.push('|');
    for (col, (cell, &width)) in cells.iter().zip(widths).enumerate() {
        if col == 0 {
            out.push_str(&format!(" {cell:<width$} |"));
        } else {
            out.push_str(&format!(" {cell:>width$} |"));
        }
    }
    out.push('\n');
}

/// Keep free text inside one Markdown cell.
fn escape_cell(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| line.trim_end().replace('|', "\\|"))
        .collect::<Vec<_>>()
        .join("<br>")
}

fn format_cell(metric: Metric, result: &AggregateResult, unit: TimeUnit) -> String {
    if metric.is_rate() {
        return format!("{:.1} ± {:.1}", result.mean, result.std_dev);
    }
    let scale = if metric == Metric::ElapsedTime {
        unit.nanos()
    } else {
        1.0
    };
    format!(
        "{} ± {}",
        thousands(result.mean / scale),
        thousands(result.std_dev / scale)
    )
}

fn thousands(value: f64) -> String {
    let rounded = value.round().max(0.0) as u64;
    rounded.to_formatted_string(&Locale::en)
}

/// Pretty-printed JSON of the whole report.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn report(&self, report: &ComparisonReport, sink: &mut dyn io::Write) -> io::Result<()> {
        serde_json::to_writer_pretty(&mut *sink, report)?;
        writeln!(sink)
    }
}
