//! Hardware performance counters.
//!
//! The runner does not talk to the kernel directly. It asks a
//! [`CounterBackend`] whether an [`Event`] can be counted, opens one
//! [`CounterSession`] per measured operation covering every event the request
//! needs, and brackets each trial with [`CounterSession::start`] and
//! [`CounterSession::stop`].
//!
//! On Linux the default backend is [`PerfCounters`], built on `perf_event_open`.
//! Everywhere else it is [`NoCounters`], which supports nothing, so requests for
//! counter metrics fail up front with
//! [`HarnessError::UnsupportedMetric`](crate::HarnessError::UnsupportedMetric).
//!
//! Counting may also be unavailable on Linux, for example inside containers or
//! with a restrictive `perf_event_paranoid`. Capability is always probed, never
//! assumed.
#[cfg(target_os = "linux")]
pub mod perf;
#[cfg(target_os = "linux")]
pub use perf::PerfCounters;

use crate::{
    error::{HarnessError, Result},
    metric::Event,
};

/// A source of hardware event counts.
pub trait CounterBackend {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether `event` can be counted on this machine right now.
    fn supports(&self, event: Event) -> bool;

    /// Open a session that counts all of `events` together.
    fn open(&self, events: &[Event]) -> Result<Box<dyn CounterSession>>;
}

/// A set of live counters for one measured operation.
pub trait CounterSession {
    /// Zero the counters and start counting.
    fn start(&mut self) -> Result<()>;

    /// Stop counting and return one count per event, in the order passed to
    /// [`CounterBackend::open`].
    fn stop(&mut self) -> Result<Vec<u64>>;
}

/// Backend for platforms without counter support.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCounters;

impl CounterBackend for NoCounters {
    fn name(&self) -> &'static str {
        "none"
    }

    fn supports(&self, _: Event) -> bool {
        false
    }

    fn open(&self, events: &[Event]) -> Result<Box<dyn CounterSession>> {
        match events.first() {
            None => Ok(Box::new(EmptySession)),
            Some(event) => Err(HarnessError::unsupported(event.name())),
        }
    }
}

struct EmptySession;

impl CounterSession for EmptySession {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<u64>> {
        Ok(Vec::new())
    }
}

/// The default backend for the current platform.
pub fn platform_counters() -> Box<dyn CounterBackend> {
    #[cfg(target_os = "linux")]
    {
        Box::new(PerfCounters)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(NoCounters)
    }
}
