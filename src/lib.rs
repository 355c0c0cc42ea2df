//! Comparo: repeated-trial benchmarking for comparing implementations side by side.
//!
//! You hand Comparo a few labelled operations that do the same job in different
//! ways. Each one is warmed up once, then measured over many trials under the same
//! settings, and the results come back as a single table with one row per
//! operation.
//!
//! # Architecture
//!
//! - [`Operation`]: a labelled, repeatable unit of work. Its return value is kept
//!   alive with [`std::hint::black_box`] so the optimizer cannot drop the work.
//! - [`TrialRunner`]: warms an operation up and measures it over N trials,
//!   producing one [`TrialResult`] per trial and metric. N is either fixed or
//!   calibrated against a time floor.
//! - [`Metric`]: what to measure. Wall-clock time is always available, hardware
//!   counters need a [`CounterBackend`], and peak heap needs [`PeakAlloc`] as the
//!   global allocator.
//! - [`Aggregate`]: a streaming collector that turns trial values into a
//!   [`Summary`].
//! - [`Report`]: a presentable form of an aggregate, see [`AggregateResult`].
//! - [`Comparison`]: runs every operation in order and assembles a
//!   [`ComparisonReport`]. A failing operation gets a failed row and the rest are
//!   still measured.
//! - [`Reporter`]: writes a report somewhere ([`TableReporter`], [`JsonReporter`]).
//!
//! # Feature flags
//! - `macros` (default): the [`macros::operations!`] macro, which labels operations
//!   with their own source text.
//!
//! # Where to start
//!
//! Read the docs for [`Comparison`] and [`TrialRunner`]. Settings can also be
//! loaded from TOML with [`HarnessConfig`].

/// Streaming aggregation of trial values
pub mod aggregate;
/// Heap tracking allocator for peak memory
pub mod alloc;
/// Side-by-side runs of several operations
pub mod comparison;
/// TOML configuration
pub mod config;
/// Hardware counter backends
pub mod counter;
pub mod error;
/// Metric names, requests and per-trial results
pub mod metric;
pub mod operation;
/// Capability and machine checks
pub mod platform;
/// Reports and Reporters
pub mod report;
/// Warm-up and trial loop for a single operation
pub mod runner;

#[cfg(feature = "macros")]
pub mod macros {
    pub use comparo_macros::*;
}

pub use aggregate::{Aggregate, Summary};
pub use alloc::PeakAlloc;
pub use comparison::{Comparison, Phase};
pub use config::{ConfigError, HarnessConfig};
#[cfg(target_os = "linux")]
pub use counter::PerfCounters;
pub use counter::{CounterBackend, CounterSession, NoCounters, platform_counters};
pub use error::{FailureKind, HarnessError, Result};
pub use metric::{Event, Metric, MetricRequest, TrialResult};
pub use operation::Operation;
pub use report::{
    AggregateResult, ComparisonReport, JsonReporter, MetricResult, Report, Reporter, Row,
    RowStatus, TableReporter, TimeUnit,
};
pub use runner::{Clock, MonotonicClock, TrialCount, TrialRunner};
