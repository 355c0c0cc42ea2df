//! `perf_event_open` backend.
use perf_event::{
    Builder, Counter, Group,
    events::{Cache, CacheOp, CacheResult, Event as PerfEvent, Hardware, Raw, WhichCache},
};

use super::{CounterBackend, CounterSession};
use crate::{error::Result, metric::Event};

/// Counts events for the calling process with Linux perf events.
///
/// Every session is one perf group, so all requested events are enabled and
/// disabled together and their counts describe exactly the same window.
#[derive(Debug, Default, Clone, Copy)]
pub struct PerfCounters;

fn perf_event(event: Event) -> PerfEvent {
    let cache = |which, result| {
        PerfEvent::from(Cache {
            which,
            operation: CacheOp::READ,
            result,
        })
    };
    match event {
        Event::Instructions => Hardware::INSTRUCTIONS.into(),
        Event::BranchInstructions => Hardware::BRANCH_INSTRUCTIONS.into(),
        Event::BranchMisses => Hardware::BRANCH_MISSES.into(),
        Event::CacheReferences => Hardware::CACHE_REFERENCES.into(),
        Event::CacheMisses => Hardware::CACHE_MISSES.into(),
        Event::L1dReadAccess => cache(WhichCache::L1D, CacheResult::ACCESS),
        Event::L1dReadMiss => cache(WhichCache::L1D, CacheResult::MISS),
        Event::LlReadAccess => cache(WhichCache::LL, CacheResult::ACCESS),
        Event::LlReadMiss => cache(WhichCache::LL, CacheResult::MISS),
        Event::Simd128Double
        | Event::Simd128Single
        | Event::Simd256Double
        | Event::Simd256Single => Raw::new(event.raw_config().unwrap_or_default()).into(),
    }
}

impl CounterBackend for PerfCounters {
    fn name(&self) -> &'static str {
        "perf_event"
    }

    fn supports(&self, event: Event) -> bool {
        // Raw codes are Intel `fp_arith_inst_retired` events.
        if event.raw_config().is_some() && !cfg!(target_arch = "x86_64") {
            return false;
        }
        match Builder::new().kind(perf_event(event)).build() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("{} unavailable: {e}", event.name());
                false
            }
        }
    }

    fn open(&self, events: &[Event]) -> Result<Box<dyn CounterSession>> {
        let mut group = Group::new()?;
        let mut counters = Vec::with_capacity(events.len());
        for &event in events {
            let counter = Builder::new()
                .group(&mut group)
                .kind(perf_event(event))
                .build()?;
            counters.push(counter);
        }
        tracing::debug!("Opened perf group with {} counters", counters.len());
        Ok(Box::new(PerfSession { group, counters }))
    }
}

struct PerfSession {
    group: Group,
    counters: Vec<Counter>,
}

impl CounterSession for PerfSession {
    fn start(&mut self) -> Result<()> {
        self.group.reset()?;
        self.group.enable()?;
        Ok(())
    }

    fn stop(&mut self) -> Result<Vec<u64>> {
        self.group.disable()?;
        let counts = self.group.read()?;
        Ok(self.counters.iter().map(|c| counts[c]).collect())
    }
}
