use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// A quantity measured once per trial.
///
/// The set is closed: a name that is not listed here is rejected when
/// the request is built, not discovered missing halfway through a run. Whether
/// the current machine can actually produce a metric is a separate question,
/// answered by [`crate::platform::supports`].
///
/// Values are reported as `f64` in the metric's natural unit: nanoseconds for
/// [`Metric::ElapsedTime`], bytes for [`Metric::PeakMemory`], event counts for
/// raw counters and percentages for the `*Rate` / `*Mispredictions` metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    #[serde(rename = "elapsed_time")]
    ElapsedTime,
    #[serde(rename = "instructions")]
    Instructions,
    #[serde(rename = "branches")]
    Branches,
    #[serde(rename = "branch_misses")]
    BranchMisses,
    #[serde(rename = "branch_mispredictions")]
    BranchMispredictions,
    #[serde(rename = "memory_cache_refs")]
    CacheReferences,
    #[serde(rename = "memory_cache_misses")]
    CacheMisses,
    #[serde(rename = "memory_cache_miss")]
    CacheMissRate,
    #[serde(rename = "l1_memory_cache_refs")]
    L1dCacheReferences,
    #[serde(rename = "l1_memory_cache_miss")]
    L1dCacheMissRate,
    #[serde(rename = "ll_memory_cache_refs")]
    LlCacheReferences,
    #[serde(rename = "ll_memory_cache_miss")]
    LlCacheMissRate,
    #[serde(rename = "simd_128bit")]
    Simd128,
    #[serde(rename = "simd_256bit")]
    Simd256,
    #[serde(rename = "peak_memory")]
    PeakMemory,
}

/// A raw hardware event a counter backend knows how to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Instructions,
    BranchInstructions,
    BranchMisses,
    CacheReferences,
    CacheMisses,
    L1dReadAccess,
    L1dReadMiss,
    LlReadAccess,
    LlReadMiss,
    /// Raw x86 event `fp_arith_inst_retired.128b_packed_double`.
    Simd128Double,
    /// Raw x86 event `fp_arith_inst_retired.128b_packed_single`.
    Simd128Single,
    /// Raw x86 event `fp_arith_inst_retired.256b_packed_double`.
    Simd256Double,
    /// Raw x86 event `fp_arith_inst_retired.256b_packed_single`.
    Simd256Single,
}

impl Event {
    pub fn name(self) -> &'static str {
        match self {
            Event::Instructions => "instructions",
            Event::BranchInstructions => "branch-instructions",
            Event::BranchMisses => "branch-misses",
            Event::CacheReferences => "cache-references",
            Event::CacheMisses => "cache-misses",
            Event::L1dReadAccess => "L1-dcache-loads",
            Event::L1dReadMiss => "L1-dcache-load-misses",
            Event::LlReadAccess => "LLC-loads",
            Event::LlReadMiss => "LLC-load-misses",
            Event::Simd128Double => "fp_arith_inst_retired.128b_packed_double",
            Event::Simd128Single => "fp_arith_inst_retired.128b_packed_single",
            Event::Simd256Double => "fp_arith_inst_retired.256b_packed_double",
            Event::Simd256Single => "fp_arith_inst_retired.256b_packed_single",
        }
    }

    /// Model-specific event code, for events the kernel has no generic name for.
    pub fn raw_config(self) -> Option<u64> {
        match self {
            Event::Simd128Double => Some(0x4C7),
            Event::Simd128Single => Some(0x8C7),
            Event::Simd256Double => Some(0x10C7),
            Event::Simd256Single => Some(0x20C7),
            _ => None,
        }
    }
}

/// Where a metric's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The monotonic clock around the call.
    Clock,
    /// Deltas of these hardware events across the call.
    Counters(&'static [Event]),
    /// High-water mark of the tracking allocator during the call.
    Heap,
}

impl Metric {
    pub const ALL: [Metric; 15] = [
        Metric::ElapsedTime,
        Metric::Instructions,
        Metric::Branches,
        Metric::BranchMisses,
        Metric::BranchMispredictions,
        Metric::CacheReferences,
        Metric::CacheMisses,
        Metric::CacheMissRate,
        Metric::L1dCacheReferences,
        Metric::L1dCacheMissRate,
        Metric::LlCacheReferences,
        Metric::LlCacheMissRate,
        Metric::Simd128,
        Metric::Simd256,
        Metric::PeakMemory,
    ];

    /// Stable identifier used in configuration files and `--measure` style lists.
    pub fn name(self) -> &'static str {
        match self {
            Metric::ElapsedTime => "elapsed_time",
            Metric::Instructions => "instructions",
            Metric::Branches => "branches",
            Metric::BranchMisses => "branch_misses",
            Metric::BranchMispredictions => "branch_mispredictions",
            Metric::CacheReferences => "memory_cache_refs",
            Metric::CacheMisses => "memory_cache_misses",
            Metric::CacheMissRate => "memory_cache_miss",
            Metric::L1dCacheReferences => "l1_memory_cache_refs",
            Metric::L1dCacheMissRate => "l1_memory_cache_miss",
            Metric::LlCacheReferences => "ll_memory_cache_refs",
            Metric::LlCacheMissRate => "ll_memory_cache_miss",
            Metric::Simd128 => "simd_128bit",
            Metric::Simd256 => "simd_256bit",
            Metric::PeakMemory => "peak_memory",
        }
    }

    /// Column header used by the table reporter.
    pub fn header(self) -> &'static str {
        match self {
            Metric::ElapsedTime => "Elapsed",
            Metric::Instructions => "CPU instructions",
            Metric::Branches => "Branch instructions",
            Metric::BranchMisses => "Branch misses",
            Metric::BranchMispredictions => "Branch misprediction %",
            Metric::CacheReferences => "Memory cache references",
            Metric::CacheMisses => "Memory cache misses",
            Metric::CacheMissRate => "Memory cache miss %",
            Metric::L1dCacheReferences => "L1 cache references",
            Metric::L1dCacheMissRate => "L1 cache miss %",
            Metric::LlCacheReferences => "LL cache references",
            Metric::LlCacheMissRate => "LL cache miss %",
            Metric::Simd128 => "SIMD 128-bit ops",
            Metric::Simd256 => "SIMD 256-bit ops",
            Metric::PeakMemory => "Peak memory bytes",
        }
    }

    pub fn source(self) -> Source {
        use Event::*;
        match self {
            Metric::ElapsedTime => Source::Clock,
            Metric::Instructions => Source::Counters(&[Instructions]),
            Metric::Branches => Source::Counters(&[BranchInstructions]),
            Metric::BranchMisses => Source::Counters(&[BranchMisses]),
            Metric::BranchMispredictions => Source::Counters(&[BranchInstructions, BranchMisses]),
            Metric::CacheReferences => Source::Counters(&[CacheReferences]),
            Metric::CacheMisses => Source::Counters(&[CacheMisses]),
            Metric::CacheMissRate => Source::Counters(&[CacheReferences, CacheMisses]),
            Metric::L1dCacheReferences => Source::Counters(&[L1dReadAccess]),
            Metric::L1dCacheMissRate => Source::Counters(&[L1dReadAccess, L1dReadMiss]),
            Metric::LlCacheReferences => Source::Counters(&[LlReadAccess]),
            Metric::LlCacheMissRate => Source::Counters(&[LlReadAccess, LlReadMiss]),
            Metric::Simd128 => Source::Counters(&[Simd128Double, Simd128Single]),
            Metric::Simd256 => Source::Counters(&[Simd256Double, Simd256Single]),
            Metric::PeakMemory => Source::Heap,
        }
    }

    /// Whether the value is a percentage rather than a count.
    pub fn is_rate(self) -> bool {
        matches!(
            self,
            Metric::BranchMispredictions
                | Metric::CacheMissRate
                | Metric::L1dCacheMissRate
                | Metric::LlCacheMissRate
        )
    }

    /// Turn the counts of this metric's events (in [`Source::Counters`] order)
    /// into the reported value.
    ///
    /// Rates are `misses / accesses * 100`, rounded to one decimal; a zero
    /// denominator gives `0.0`. Everything else is the sum of its counts, so
    /// the SIMD metrics add up their single and double precision events.
    pub fn derive(self, counts: &[u64]) -> f64 {
        match counts {
            [total, misses] if self.is_rate() => {
                if *total == 0 {
                    0.0
                } else {
                    let pct = *misses as f64 / *total as f64 * 100.0;
                    (pct * 10.0).round() / 10.0
                }
            }
            _ if self.is_rate() => 0.0,
            counts => counts.iter().sum::<u64>() as f64,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        Metric::ALL
            .into_iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| HarnessError::unsupported(name))
    }
}

/// The metrics to record on every trial.
///
/// Always holds at least one metric, in the order they were requested, with
/// duplicates removed. Reports use this order for their columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricRequest {
    metrics: Vec<Metric>,
}

impl MetricRequest {
    pub fn new(metrics: impl IntoIterator<Item = Metric>) -> Result<Self> {
        let mut unique: Vec<Metric> = Vec::new();
        for metric in metrics {
            if !unique.contains(&metric) {
                unique.push(metric);
            }
        }
        if unique.is_empty() {
            return Err(HarnessError::EmptyRequest);
        }
        Ok(Self { metrics: unique })
    }

    /// Wall-clock time only.
    pub fn elapsed_time() -> Self {
        Self {
            metrics: vec![Metric::ElapsedTime],
        }
    }

    /// Parse a list of names such as `"elapsed_time,instructions"`.
    ///
    /// Every name must be known; blank entries are skipped.
    pub fn parse(names: &str) -> Result<Self> {
        Self::from_names(names.split(',').filter(|n| !n.trim().is_empty()))
    }

    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let metrics = names
            .into_iter()
            .map(|n| n.as_ref().parse())
            .collect::<Result<Vec<Metric>>>()?;
        Self::new(metrics)
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn contains(&self, metric: Metric) -> bool {
        self.metrics.contains(&metric)
    }

    /// Union of the hardware events needed by the request, in first-use order.
    pub fn events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for metric in &self.metrics {
            if let Source::Counters(needed) = metric.source() {
                for event in needed {
                    if !events.contains(event) {
                        events.push(*event);
                    }
                }
            }
        }
        events
    }

    pub fn needs_heap(&self) -> bool {
        self.metrics.iter().any(|m| m.source() == Source::Heap)
    }
}

impl FromStr for MetricRequest {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// One value of one metric, for one trial of one operation.
///
/// Trial results are only created by the runner and cannot be changed
/// afterwards. All results of one run share a single label allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    label: Arc<str>,
    metric: Metric,
    value: f64,
    trial: usize,
}

impl TrialResult {
    pub(crate) fn new(label: Arc<str>, metric: Metric, value: f64, trial: usize) -> Self {
        Self {
            label,
            metric,
            value,
            trial,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Zero-based index of the measured trial. The warm-up call has no index.
    pub fn trial(&self) -> usize {
        self.trial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod metric {
        use super::*;

        #[test]
        fn names_round_trip() {
            for metric in Metric::ALL {
                assert_eq!(metric.name().parse::<Metric>().unwrap(), metric);
                assert_eq!(metric.to_string(), metric.name());
            }
        }

        #[test]
        fn unknown_name_is_rejected() {
            let err = "nonexistent_counter".parse::<Metric>().unwrap_err();
            assert!(matches!(
                err,
                HarnessError::UnsupportedMetric { ref metric } if metric == "nonexistent_counter"
            ));
        }

        #[test]
        fn serde_uses_stable_names() {
            let json = serde_json::to_string(&Metric::CacheMissRate).unwrap();
            assert_eq!(json, "\"memory_cache_miss\"");
        }

        #[test]
        fn rates_are_percentages_rounded_to_one_decimal() {
            assert_eq!(Metric::BranchMispredictions.derive(&[3, 1]), 33.3);
            assert_eq!(Metric::CacheMissRate.derive(&[200, 10]), 5.0);
        }

        #[test]
        fn rate_with_zero_denominator_is_zero() {
            assert_eq!(Metric::L1dCacheMissRate.derive(&[0, 0]), 0.0);
        }

        #[test]
        fn single_counter_is_passed_through() {
            assert_eq!(Metric::Instructions.derive(&[12_345]), 12_345.0);
        }

        #[test]
        fn simd_adds_single_and_double_precision() {
            assert_eq!(Metric::Simd256.derive(&[300, 50]), 350.0);
            assert_eq!(Metric::Simd128.derive(&[0, 7]), 7.0);
            assert!(!Metric::Simd256.is_rate());
        }

        #[test]
        fn simd_events_carry_raw_codes() {
            let Source::Counters(events) = Metric::Simd256.source() else {
                panic!("simd_256bit should come from counters");
            };
            let codes: Vec<_> = events.iter().map(|e| e.raw_config()).collect();
            assert_eq!(codes, vec![Some(0x10C7), Some(0x20C7)]);
            assert_eq!(Event::Instructions.raw_config(), None);
        }
    }

    mod request {
        use super::*;

        #[test]
        fn keeps_order_and_drops_duplicates() {
            let req = MetricRequest::parse("instructions, elapsed_time,instructions").unwrap();
            assert_eq!(req.metrics(), &[Metric::Instructions, Metric::ElapsedTime]);
        }

        #[test]
        fn empty_request_is_rejected() {
            assert!(matches!(
                MetricRequest::parse(" , "),
                Err(HarnessError::EmptyRequest)
            ));
            assert!(matches!(
                MetricRequest::new([]),
                Err(HarnessError::EmptyRequest)
            ));
        }

        #[test]
        fn one_unknown_name_rejects_everything() {
            assert!(matches!(
                MetricRequest::parse("elapsed_time,nonexistent_counter"),
                Err(HarnessError::UnsupportedMetric { .. })
            ));
        }

        #[test]
        fn events_are_shared_between_metrics() {
            let req = MetricRequest::new([
                Metric::Branches,
                Metric::BranchMispredictions,
                Metric::ElapsedTime,
            ])
            .unwrap();
            assert_eq!(
                req.events(),
                vec![Event::BranchInstructions, Event::BranchMisses]
            );
        }

        #[test]
        fn heap_is_only_needed_for_peak_memory() {
            assert!(!MetricRequest::elapsed_time().needs_heap());
            assert!(
                MetricRequest::new([Metric::PeakMemory])
                    .unwrap()
                    .needs_heap()
            );
        }
    }
}
