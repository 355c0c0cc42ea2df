use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    error::{HarnessError, Result},
    metric::{MetricRequest, TrialResult},
    operation::Operation,
    report::{ComparisonReport, Row},
    runner::TrialRunner,
};

/// Where one operation is within a comparison run.
///
/// ```text
/// Pending -> WarmingUp -> Measuring -> Aggregated
///                 \            \
///                  +-> Failed   +-> Failed
/// ```
/// `Aggregated` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Pending,
    WarmingUp,
    Measuring,
    Aggregated,
    Failed,
}

impl Phase {
    pub fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Pending, WarmingUp)
                | (WarmingUp, Measuring)
                | (WarmingUp, Failed)
                | (Measuring, Aggregated)
                | (Measuring, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Aggregated | Phase::Failed)
    }

    fn advance(&mut self, label: &str, next: Phase) {
        debug_assert!(
            self.can_advance_to(next),
            "illegal transition {self:?} -> {next:?}"
        );
        tracing::debug!("{label}: {self:?} -> {next:?}");
        *self = next;
    }
}

/// Runs several labelled operations under identical settings and reports them
/// side by side.
///
/// Operations run one after another on the calling thread, in the order given,
/// and every one goes through the same [`TrialRunner`] with the same
/// [`MetricRequest`]. An operation that fails during warm-up or measurement
/// gets a failed row; the others are still measured.
///
/// # Example
/// ```rust
/// use comparo::{Comparison, Operation, TrialCount, TrialRunner};
///
/// let data: Vec<i64> = (0..10_000).collect();
/// let mut comparison = Comparison::builder()
///     .title("doubling")
///     .operations(vec![
///         Operation::new("map", || data.iter().map(|v| v * 2).collect::<Vec<_>>()),
///         Operation::new("loop", || {
///             let mut out = Vec::with_capacity(data.len());
///             for v in &data {
///                 out.push(v * 2);
///             }
///             out
///         }),
///     ])
///     .runner(TrialRunner::builder().trials(TrialCount::Fixed(10)).build())
///     .build();
///
/// let report = comparison.run().unwrap();
/// assert_eq!(report.labels(), vec!["map", "loop"]);
/// ```
#[derive(Debug, TypedBuilder)]
pub struct Comparison<'a> {
    #[builder(default = String::from("Comparison"), setter(into))]
    pub title: String,
    pub operations: Vec<Operation<'a>>,
    #[builder(default = MetricRequest::elapsed_time())]
    pub metrics: MetricRequest,
    #[builder(default)]
    pub runner: TrialRunner,
    #[builder(default, setter(skip))]
    phases: Vec<Phase>,
    #[builder(default, setter(skip))]
    trials: Vec<TrialResult>,
}

impl<'a> Comparison<'a> {
    /// Measure every operation and build the report.
    ///
    /// Returns `Err` only for problems with the request itself (duplicate
    /// labels, unsupported metrics, a zero trial count), and then before any
    /// operation has been called.
    pub fn run(&mut self) -> Result<ComparisonReport> {
        self.phases.clear();
        self.trials.clear();
        self.check_labels()?;
        self.runner.validate(&self.metrics)?;

        self.phases = vec![Phase::Pending; self.operations.len()];

        tracing::info!(
            "Running comparison {} with {} operations",
            self.title,
            self.operations.len()
        );
        let mut rows = Vec::with_capacity(self.operations.len());
        for (op, phase) in self.operations.iter_mut().zip(self.phases.iter_mut()) {
            let row = match measure_one(&self.runner, &self.metrics, op, phase) {
                Ok(results) => {
                    let row = Row::aggregated(op.label().to_owned(), &self.metrics, &results);
                    self.trials.extend(results);
                    phase.advance(op.label(), Phase::Aggregated);
                    row
                }
                Err(e) => {
                    tracing::warn!("{e}");
                    phase.advance(op.label(), Phase::Failed);
                    Row::failed(op.label().to_owned(), &e)
                }
            };
            rows.push(row);
        }
        tracing::info!("Done running comparison {}!", self.title);

        Ok(ComparisonReport {
            title: self.title.clone(),
            metrics: self.metrics.metrics().to_vec(),
            rows,
        })
    }

    /// Phase reached by `label` in the last run, `None` if that run was
    /// rejected before any operation started.
    pub fn phase(&self, label: &str) -> Option<Phase> {
        self.operations
            .iter()
            .position(|op| op.label() == label)
            .and_then(|i| self.phases.get(i).copied())
    }

    /// Every trial result recorded by the last run, grouped by operation.
    pub fn trial_results(&self) -> &[TrialResult] {
        &self.trials
    }

    fn check_labels(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for op in &self.operations {
            if !seen.insert(op.label()) {
                return Err(HarnessError::DuplicateLabel {
                    label: op.label().to_owned(),
                });
            }
        }
        Ok(())
    }
}

fn measure_one(
    runner: &TrialRunner,
    request: &MetricRequest,
    op: &mut Operation<'_>,
    phase: &mut Phase,
) -> Result<Vec<TrialResult>> {
    phase.advance(op.label(), Phase::WarmingUp);
    runner.warm_up(op)?;
    phase.advance(op.label(), Phase::Measuring);
    runner.measure(op, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FailureKind, Metric, RowStatus, TrialCount, counter::NoCounters};
    use std::cell::Cell;

    fn runner(n: usize) -> TrialRunner {
        TrialRunner::builder()
            .trials(TrialCount::Fixed(n))
            .counters(Box::new(NoCounters))
            .build()
    }

    fn busy() -> u64 {
        (0..1_000u64).map(std::hint::black_box).sum()
    }

    mod phase {
        use super::*;

        #[test]
        fn legal_transitions() {
            assert!(Phase::Pending.can_advance_to(Phase::WarmingUp));
            assert!(Phase::WarmingUp.can_advance_to(Phase::Measuring));
            assert!(Phase::WarmingUp.can_advance_to(Phase::Failed));
            assert!(Phase::Measuring.can_advance_to(Phase::Aggregated));
            assert!(Phase::Measuring.can_advance_to(Phase::Failed));
        }

        #[test]
        fn terminal_phases_do_not_move() {
            for next in [
                Phase::Pending,
                Phase::WarmingUp,
                Phase::Measuring,
                Phase::Aggregated,
                Phase::Failed,
            ] {
                assert!(!Phase::Aggregated.can_advance_to(next));
                assert!(!Phase::Failed.can_advance_to(next));
            }
            assert!(Phase::Aggregated.is_terminal());
            assert!(Phase::Failed.is_terminal());
            assert!(!Phase::Pending.can_advance_to(Phase::Failed));
        }
    }

    #[test]
    fn phases_after_run() {
        let mut comparison = Comparison::builder()
            .operations(vec![
                Operation::new("ok", busy),
                Operation::fallible("cold", || Err::<(), _>("no warm-up")),
                Operation::new("unused", busy),
            ])
            .runner(runner(2))
            .build();

        assert_eq!(comparison.phase("ok"), None);
        comparison.run().unwrap();
        assert_eq!(comparison.phase("ok"), Some(Phase::Aggregated));
        assert_eq!(comparison.phase("cold"), Some(Phase::Failed));
        assert_eq!(comparison.phase("unused"), Some(Phase::Aggregated));
        assert_eq!(comparison.phase("missing"), None);
    }

    #[test]
    fn warm_up_failure_is_a_compilation_row() {
        let mut comparison = Comparison::builder()
            .operations(vec![Operation::fallible("cold", || {
                Err::<(), _>("no warm-up")
            })])
            .runner(runner(2))
            .build();
        let report = comparison.run().unwrap();
        assert!(matches!(
            report.rows[0].status,
            RowStatus::Failed {
                kind: FailureKind::Compilation,
                ..
            }
        ));
        assert!(report.rows[0].results.is_empty());
    }

    #[test]
    fn duplicate_labels_are_fatal() {
        let calls = Cell::new(0);
        let mut comparison = Comparison::builder()
            .operations(vec![
                Operation::new("same", || calls.set(calls.get() + 1)),
                Operation::new("same", || calls.set(calls.get() + 1)),
            ])
            .runner(runner(2))
            .build();
        let err = comparison.run().unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateLabel { ref label } if label == "same"));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn rejected_rerun_forgets_the_previous_run() {
        let mut comparison = Comparison::builder()
            .operations(vec![Operation::new("a", busy)])
            .runner(runner(2))
            .build();
        comparison.run().unwrap();
        assert_eq!(comparison.phase("a"), Some(Phase::Aggregated));

        comparison.metrics = MetricRequest::new([Metric::Instructions]).unwrap();
        assert!(comparison.run().is_err());
        assert_eq!(comparison.phase("a"), None);
        assert!(comparison.trial_results().is_empty());
    }

    #[test]
    fn trial_results_belong_to_the_last_run() {
        let mut comparison = Comparison::builder()
            .operations(vec![Operation::new("a", busy), Operation::new("b", busy)])
            .metrics(MetricRequest::elapsed_time())
            .runner(runner(3))
            .build();
        comparison.run().unwrap();
        assert_eq!(comparison.trial_results().len(), 6);
        comparison.run().unwrap();
        assert_eq!(comparison.trial_results().len(), 6);
        assert!(
            comparison.trial_results()[..3]
                .iter()
                .all(|t| t.label() == "a" && t.metric() == Metric::ElapsedTime)
        );
    }
}
