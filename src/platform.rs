//! Capability queries and machine checks.
use std::{fs, path::Path};

use crate::{
    alloc::PeakAlloc,
    counter::CounterBackend,
    metric::{Metric, Source},
};

const NO_TURBO: &str = "/sys/devices/system/cpu/intel_pstate/no_turbo";

/// Whether `metric` can be measured with `counters` in this process.
pub fn supports(metric: Metric, counters: &dyn CounterBackend) -> bool {
    match metric.source() {
        Source::Clock => true,
        Source::Counters(events) => events.iter().all(|&e| counters.supports(e)),
        Source::Heap => PeakAlloc::is_installed(),
    }
}

/// Every metric [`supports`] accepts.
pub fn supported_metrics(counters: &dyn CounterBackend) -> Vec<Metric> {
    Metric::ALL
        .into_iter()
        .filter(|&m| supports(m, counters))
        .collect()
}

/// `Some(true)` if Intel turbo boost is switched off, `None` when the machine
/// does not expose the setting.
pub fn turbo_boost_disabled() -> Option<bool> {
    read_flag(Path::new(NO_TURBO))
}

fn read_flag(path: &Path) -> Option<bool> {
    fs::read_to_string(path).ok().map(|s| s.trim() == "1")
}

/// Log a warning when the CPU may change frequency between trials.
///
/// Returns `false` if turbo boost is known to be on. Never fails the run.
pub fn check_environment() -> bool {
    match turbo_boost_disabled() {
        Some(true) => true,
        Some(false) => {
            tracing::warn!(
                "Turbo boost is enabled, timings will be noisy. Write 1 to {NO_TURBO} to disable it."
            );
            false
        }
        None => {
            tracing::debug!("Cannot tell whether frequency scaling is active");
            true
        }
    }
}
