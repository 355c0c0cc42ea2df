//! The trial runner: warm up one operation, then measure it repeatedly.
//!
//! # Flow
//! 1. [`TrialRunner::validate`] checks every requested metric against the clock,
//!    the counter backend and the tracking allocator. Nothing is invoked yet.
//! 2. [`TrialRunner::warm_up`] calls the operation once and throws the result
//!    away, absorbing first-call costs such as lazy initialisation or cold
//!    caches. A failure here is a [`HarnessError::Compilation`].
//! 3. [`TrialRunner::measure`] settles the trial count, opens one counter
//!    session, and records every requested metric on every trial.
//!
//! [`TrialRunner::run`] does all three.
//!
//! # Automatic trial count
//! With [`TrialCount::Auto`] the runner times batches of 1, 2, 4, ... calls until
//! one batch takes longer than `time_floor` (default 200ms) or reaches
//! `max_trials`. That batch size becomes the trial count. Calibration calls are
//! never recorded.
//!
//! # Per-trial bracketing
//! ```text
//! reset heap peak -> start counters -> clock -> call -> clock -> stop counters
//! ```
//! Counter and allocator bookkeeping sit outside the timed window. A trial that
//! measures zero elapsed time is retried once; a second zero is a
//! [`HarnessError::Measurement`].
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    alloc::PeakAlloc,
    counter::{CounterBackend, CounterSession, platform_counters},
    error::{HarnessError, Result},
    metric::{Event, Metric, MetricRequest, Source, TrialResult},
    operation::Operation,
    platform,
};

pub const DEFAULT_TIME_FLOOR: Duration = Duration::from_millis(200);
/// Cap on the automatic trial count. Results are kept per trial and per
/// metric, so this also bounds memory for very fast operations.
pub const DEFAULT_MAX_TRIALS: usize = 10_000;

/// How many measured trials to run per operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialCount {
    /// Double until a batch exceeds the runner's time floor.
    #[default]
    Auto,
    Fixed(usize),
}

/// Monotonic time source for trials.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Runs one [`Operation`] and records per-trial [`TrialResult`]s.
///
/// A runner holds no per-run state; every call to [`TrialRunner::run`] or
/// [`TrialRunner::measure`] produces a fresh, independent sequence.
///
/// # Example
/// ```rust
/// use comparo::{MetricRequest, Operation, TrialCount, TrialRunner};
///
/// let runner = TrialRunner::builder().trials(TrialCount::Fixed(5)).build();
/// let values: Vec<u64> = (0..1_000).collect();
/// let mut op = Operation::new("sum", || values.iter().sum::<u64>());
///
/// let results = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
/// assert_eq!(results.len(), 5);
/// ```
#[derive(TypedBuilder)]
pub struct TrialRunner {
    #[builder(default)]
    pub trials: TrialCount,
    #[builder(default = DEFAULT_TIME_FLOOR)]
    pub time_floor: Duration,
    #[builder(default = DEFAULT_MAX_TRIALS)]
    pub max_trials: usize,
    /// Warn about turbo boost before the first measurement.
    #[builder(default = false)]
    pub check_environment: bool,
    #[builder(default = platform_counters())]
    pub counters: Box<dyn CounterBackend>,
    #[builder(default = Box::new(MonotonicClock) as Box<dyn Clock>)]
    pub clock: Box<dyn Clock>,
}

impl Default for TrialRunner {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for TrialRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrialRunner")
            .field("trials", &self.trials)
            .field("time_floor", &self.time_floor)
            .field("max_trials", &self.max_trials)
            .field("check_environment", &self.check_environment)
            .field("counters", &self.counters.name())
            .finish_non_exhaustive()
    }
}

/// Raw readings of a single trial.
struct Reading {
    elapsed: Duration,
    counts: Vec<u64>,
    peak_bytes: usize,
}

impl TrialRunner {
    /// Validate, warm up and measure `op`.
    pub fn run(&self, op: &mut Operation<'_>, request: &MetricRequest) -> Result<Vec<TrialResult>> {
        self.validate(request)?;
        self.warm_up(op)?;
        self.measure(op, request)
    }

    /// Fail with [`HarnessError::UnsupportedMetric`] if any requested metric
    /// cannot be measured here.
    pub fn validate(&self, request: &MetricRequest) -> Result<()> {
        if self.trials == TrialCount::Fixed(0) {
            return Err(HarnessError::InvalidTrialCount);
        }
        if let Some(metric) = request
            .metrics()
            .iter()
            .find(|&&m| !platform::supports(m, self.counters.as_ref()))
        {
            return Err(HarnessError::unsupported(metric.name()));
        }
        if self.check_environment {
            platform::check_environment();
        }
        Ok(())
    }

    /// Call `op` once, untimed.
    pub fn warm_up(&self, op: &mut Operation<'_>) -> Result<()> {
        tracing::debug!("Warming up {}", op.label());
        op.invoke().map_err(|reason| HarnessError::Compilation {
            label: op.label().to_owned(),
            reason,
        })
    }

    /// Measure `op`, assuming the request was validated and `op` warmed up.
    pub fn measure(&self, op: &mut Operation<'_>, request: &MetricRequest) -> Result<Vec<TrialResult>> {
        let trials = self.resolve_trials(op)?;
        let events = request.events();
        let mut session = if events.is_empty() {
            None
        } else {
            Some(self.counters.open(&events)?)
        };
        let track_heap = request.needs_heap();

        tracing::info!(
            "Measuring {} over {trials} trials ({} metrics)",
            op.label(),
            request.metrics().len()
        );
        let label: Arc<str> = Arc::from(op.label());
        let mut results = Vec::with_capacity(trials * request.metrics().len());
        for trial in 0..trials {
            let reading = self.trial(op, trial, session.as_deref_mut(), track_heap)?;
            for &metric in request.metrics() {
                let value = value_of(metric, &events, &reading);
                results.push(TrialResult::new(Arc::clone(&label), metric, value, trial));
            }
        }
        Ok(results)
    }

    fn resolve_trials(&self, op: &mut Operation<'_>) -> Result<usize> {
        match self.trials {
            TrialCount::Fixed(0) => Err(HarnessError::InvalidTrialCount),
            TrialCount::Fixed(n) => Ok(n),
            TrialCount::Auto => self.calibrate(op),
        }
    }

    /// Batch size whose total time first exceeds the time floor.
    fn calibrate(&self, op: &mut Operation<'_>) -> Result<usize> {
        let max = self.max_trials.max(1);
        let mut count = 1;
        loop {
            let start = self.clock.now();
            for trial in 0..count {
                op.invoke().map_err(|reason| HarnessError::Operation {
                    label: op.label().to_owned(),
                    trial,
                    reason,
                })?;
            }
            let total = self.clock.now().saturating_duration_since(start);
            if total > self.time_floor {
                tracing::debug!("Calibrated {} to {count} trials ({total:?})", op.label());
                return Ok(count);
            }
            if count >= max {
                tracing::warn!(
                    "{} stayed under {:?} after {count} calls, capping trials at {max}",
                    op.label(),
                    self.time_floor
                );
                return Ok(max);
            }
            count = (count * 2).min(max);
        }
    }

    fn trial(
        &self,
        op: &mut Operation<'_>,
        trial: usize,
        mut session: Option<&mut (dyn CounterSession + 'static)>,
        track_heap: bool,
    ) -> Result<Reading> {
        let mut retried = false;
        loop {
            let baseline = track_heap.then(PeakAlloc::reset_peak);
            if let Some(s) = session.as_deref_mut() {
                s.start()?;
            }

            let start = self.clock.now();
            let outcome = op.invoke();
            let elapsed = self.clock.now().saturating_duration_since(start);

            let counts = match session.as_deref_mut() {
                Some(s) => s.stop()?,
                None => Vec::new(),
            };
            let peak_bytes = baseline.map_or(0, |b| PeakAlloc::peak().saturating_sub(b));

            if let Err(reason) = outcome {
                return Err(HarnessError::Operation {
                    label: op.label().to_owned(),
                    trial,
                    reason,
                });
            }
            if !elapsed.is_zero() {
                return Ok(Reading {
                    elapsed,
                    counts,
                    peak_bytes,
                });
            }
            if retried {
                return Err(HarnessError::Measurement {
                    label: op.label().to_owned(),
                    trial,
                });
            }
            tracing::debug!("{} trial {trial} measured zero time, retrying", op.label());
            retried = true;
        }
    }
}

fn value_of(metric: Metric, events: &[Event], reading: &Reading) -> f64 {
    match metric.source() {
        Source::Clock => reading.elapsed.as_nanos() as f64,
        Source::Heap => reading.peak_bytes as f64,
        Source::Counters(needed) => {
            let counts: Vec<u64> = needed
                .iter()
                .map(|e| {
                    events
                        .iter()
                        .position(|x| x == e)
                        .and_then(|i| reading.counts.get(i).copied())
                        .unwrap_or(0)
                })
                .collect();
            metric.derive(&counts)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::counter::NoCounters;
    use proptest::prelude::*;
    use std::{cell::Cell, rc::Rc};

    /// Counter backend that reports the same counts on every trial.
    pub(crate) struct FixedCounters;

    impl FixedCounters {
        fn count(event: Event) -> u64 {
            match event {
                Event::Instructions => 1_000,
                Event::BranchInstructions => 200,
                Event::BranchMisses => 10,
                Event::CacheReferences => 50,
                Event::CacheMisses => 5,
                _ => 1,
            }
        }
    }

    impl CounterBackend for FixedCounters {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn supports(&self, _: Event) -> bool {
            true
        }

        fn open(&self, events: &[Event]) -> Result<Box<dyn CounterSession>> {
            Ok(Box::new(FixedSession(events.to_vec())))
        }
    }

    struct FixedSession(Vec<Event>);

    impl CounterSession for FixedSession {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<Vec<u64>> {
            Ok(self.0.iter().map(|&e| FixedCounters::count(e)).collect())
        }
    }

    /// Clock that only moves when the test advances it.
    #[derive(Clone)]
    struct ManualClock {
        origin: Instant,
        offset: Rc<Cell<Duration>>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Rc::new(Cell::new(Duration::ZERO)),
            }
        }

        fn advance(&self, by: Duration) {
            self.offset.set(self.offset.get() + by);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.offset.get()
        }
    }

    /// A little real work, so a trial never reads as zero time.
    fn busy() -> u64 {
        (0..1_000u64).map(std::hint::black_box).sum()
    }

    fn fixed(n: usize) -> TrialRunner {
        TrialRunner::builder()
            .trials(TrialCount::Fixed(n))
            .counters(Box::new(NoCounters))
            .build()
    }

    mod validate {
        use super::*;

        #[test]
        fn counter_metric_without_backend_is_unsupported() {
            let request = MetricRequest::new([Metric::ElapsedTime, Metric::Instructions]).unwrap();
            let err = fixed(3).validate(&request).unwrap_err();
            assert!(matches!(err, HarnessError::UnsupportedMetric { ref metric } if metric == "instructions"));
        }

        #[test]
        fn unsupported_metric_invokes_nothing() {
            let calls = Cell::new(0);
            let mut op = Operation::new("op", || calls.set(calls.get() + 1));
            let request = MetricRequest::new([Metric::BranchMisses]).unwrap();
            assert!(fixed(3).run(&mut op, &request).is_err());
            assert_eq!(calls.get(), 0);
        }

        #[test]
        fn zero_trials_is_rejected() {
            let err = fixed(0).validate(&MetricRequest::elapsed_time()).unwrap_err();
            assert!(matches!(err, HarnessError::InvalidTrialCount));
        }
    }

    mod run {
        use super::*;

        #[test]
        fn results_are_ordered_by_trial_then_metric() {
            let runner = TrialRunner::builder()
                .trials(TrialCount::Fixed(3))
                .counters(Box::new(FixedCounters))
                .build();
            let request = MetricRequest::new([Metric::Instructions, Metric::ElapsedTime]).unwrap();
            let mut op = Operation::new("op", || (0..100u64).sum::<u64>());
            let results = runner.run(&mut op, &request).unwrap();

            let order: Vec<(usize, Metric)> =
                results.iter().map(|r| (r.trial(), r.metric())).collect();
            assert_eq!(
                order,
                vec![
                    (0, Metric::Instructions),
                    (0, Metric::ElapsedTime),
                    (1, Metric::Instructions),
                    (1, Metric::ElapsedTime),
                    (2, Metric::Instructions),
                    (2, Metric::ElapsedTime),
                ]
            );
            assert!(results.iter().all(|r| r.label() == "op"));
        }

        #[test]
        fn results_share_one_label() {
            let mut op = Operation::new("shared", busy);
            let results = fixed(4).run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            let first = results[0].label().as_ptr();
            assert!(results.iter().all(|r| r.label().as_ptr() == first));
        }

        #[test]
        fn derived_counter_metrics() {
            let runner = TrialRunner::builder()
                .trials(TrialCount::Fixed(2))
                .counters(Box::new(FixedCounters))
                .build();
            let request = MetricRequest::new([
                Metric::Branches,
                Metric::BranchMispredictions,
                Metric::CacheMissRate,
            ])
            .unwrap();
            let mut op = Operation::new("op", busy);
            let results = runner.run(&mut op, &request).unwrap();
            let values: Vec<f64> = results[..3].iter().map(|r| r.value()).collect();
            assert_eq!(values, vec![200.0, 5.0, 10.0]);
        }

        #[test]
        fn warm_up_call_is_not_recorded() {
            let calls = Cell::new(0);
            let mut op = Operation::new("op", || {
                calls.set(calls.get() + 1);
                busy()
            });
            let results = fixed(4).run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            assert_eq!(results.len(), 4);
            assert_eq!(calls.get(), 5);
        }

        #[test]
        fn slow_first_call_does_not_reach_the_mean() {
            let first = Cell::new(true);
            let mut op = Operation::new("setup-heavy", || {
                if first.replace(false) {
                    std::thread::sleep(Duration::from_millis(100));
                }
                busy()
            });
            let results = fixed(10).run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            let mean = results.iter().map(|r| r.value()).sum::<f64>() / results.len() as f64;
            assert!(mean < Duration::from_millis(50).as_nanos() as f64);
        }

        #[test]
        fn runs_are_independent() {
            let runner = fixed(3);
            let mut op = Operation::new("op", busy);
            let first = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            let second = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            assert_eq!(first.len(), second.len());
            assert_eq!(
                second.iter().map(|r| r.trial()).collect::<Vec<_>>(),
                vec![0, 1, 2]
            );
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn failing_warm_up_is_a_compilation_error() {
            let mut op = Operation::fallible("op", || Err::<(), _>("no kernel"));
            let err = fixed(3).run(&mut op, &MetricRequest::elapsed_time()).unwrap_err();
            assert!(matches!(err, HarnessError::Compilation { ref reason, .. } if reason == "no kernel"));
        }

        #[test]
        fn failing_trial_is_an_operation_error() {
            let calls = Cell::new(0);
            let mut op = Operation::fallible("op", || {
                calls.set(calls.get() + 1);
                if calls.get() > 2 { Err("overflow") } else { Ok(busy()) }
            });
            let err = fixed(5).run(&mut op, &MetricRequest::elapsed_time()).unwrap_err();
            assert!(matches!(err, HarnessError::Operation { trial: 1, .. }));
        }

        #[test]
        fn panicking_trial_is_an_operation_error() {
            let calls = Cell::new(0);
            let mut op = Operation::new("op", || {
                calls.set(calls.get() + 1);
                assert!(calls.get() < 2, "second call");
                busy()
            });
            let err = fixed(5).run(&mut op, &MetricRequest::elapsed_time()).unwrap_err();
            assert!(matches!(err, HarnessError::Operation { trial: 0, ref reason, .. } if reason.contains("second call")));
        }

        #[test]
        fn zero_duration_twice_is_a_measurement_error() {
            let runner = TrialRunner::builder()
                .trials(TrialCount::Fixed(3))
                .counters(Box::new(NoCounters))
                .clock(Box::new(ManualClock::new()))
                .build();
            let calls = Cell::new(0);
            let mut op = Operation::new("frozen", || calls.set(calls.get() + 1));
            let err = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap_err();
            assert!(matches!(err, HarnessError::Measurement { trial: 0, .. }));
            // warm-up, first attempt, one retry
            assert_eq!(calls.get(), 3);
        }

        #[test]
        fn zero_duration_once_is_retried() {
            let clock = ManualClock::new();
            let runner = TrialRunner::builder()
                .trials(TrialCount::Fixed(2))
                .counters(Box::new(NoCounters))
                .clock(Box::new(clock.clone()))
                .build();
            let calls = Cell::new(0);
            let mut op = Operation::new("flaky-clock", || {
                calls.set(calls.get() + 1);
                // warm-up is call 1, the first measured attempt is call 2
                if calls.get() != 2 {
                    clock.advance(Duration::from_micros(5));
                }
            });
            let results = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            assert_eq!(results.len(), 2);
            assert!(results.iter().all(|r| r.value() == 5_000.0));
            assert_eq!(calls.get(), 4);
        }
    }

    mod calibrate {
        use super::*;

        fn auto_runner(clock: &ManualClock, max_trials: usize) -> TrialRunner {
            TrialRunner::builder()
                .trials(TrialCount::Auto)
                .time_floor(Duration::from_millis(200))
                .max_trials(max_trials)
                .counters(Box::new(NoCounters))
                .clock(Box::new(clock.clone()))
                .build()
        }

        #[test]
        fn doubles_until_the_floor_is_exceeded() {
            let clock = ManualClock::new();
            let runner = auto_runner(&clock, DEFAULT_MAX_TRIALS);
            let mut op = Operation::new("10ms", || clock.advance(Duration::from_millis(10)));
            // 1, 2, 4, 8, 16 calls stay at or under 200ms; 32 calls take 320ms.
            let results = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            assert_eq!(results.len(), 32);
        }

        #[test]
        fn stops_at_max_trials() {
            let clock = ManualClock::new();
            let runner = auto_runner(&clock, 6);
            let mut op = Operation::new("1ns", || clock.advance(Duration::from_nanos(1)));
            let results = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            assert_eq!(results.len(), 6);
        }

        #[test]
        fn default_cap_bounds_fast_operations() {
            let clock = ManualClock::new();
            let runner = TrialRunner::builder()
                .counters(Box::new(NoCounters))
                .clock(Box::new(clock.clone()))
                .build();
            assert_eq!(runner.max_trials, 10_000);
            let mut op = Operation::new("noop", || clock.advance(Duration::from_nanos(1)));
            let results = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap();
            assert_eq!(results.len(), DEFAULT_MAX_TRIALS);
        }

        #[test]
        fn failure_during_calibration_is_reported() {
            let calls = Cell::new(0);
            let mut op = Operation::fallible("op", || {
                calls.set(calls.get() + 1);
                if calls.get() == 3 { Err("bad input") } else { Ok(busy()) }
            });
            let runner = TrialRunner::builder()
                .counters(Box::new(NoCounters))
                .build();
            let err = runner.run(&mut op, &MetricRequest::elapsed_time()).unwrap_err();
            assert!(matches!(err, HarnessError::Operation { .. }));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn n_trials_give_n_results_per_metric(n in 1usize..40) {
            let runner = TrialRunner::builder()
                .trials(TrialCount::Fixed(n))
                .counters(Box::new(FixedCounters))
                .build();
            let request = MetricRequest::new([Metric::ElapsedTime, Metric::Instructions]).unwrap();
            let data: Vec<u32> = (0..64).collect();
            let mut op = Operation::new("sum", || data.iter().map(|&x| x as u64).sum::<u64>());
            let results = runner.run(&mut op, &request).unwrap();
            for metric in request.metrics() {
                prop_assert_eq!(results.iter().filter(|r| r.metric() == *metric).count(), n);
            }
        }
    }
}
