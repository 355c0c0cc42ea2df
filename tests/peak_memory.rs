//! Runs in its own binary so the tracking allocator is the global one.
use comparo::{Metric, MetricRequest, NoCounters, Operation, PeakAlloc, TrialCount, TrialRunner};

#[global_allocator]
static ALLOC: PeakAlloc = PeakAlloc;

#[test]
fn peak_memory_sees_a_megabyte() {
    assert!(PeakAlloc::is_installed());

    let runner = TrialRunner::builder()
        .trials(TrialCount::Fixed(3))
        .counters(Box::new(NoCounters))
        .build();
    let request = MetricRequest::new([Metric::ElapsedTime, Metric::PeakMemory]).unwrap();
    let mut op = Operation::new("megabyte", || vec![1u8; 1_000_000]);

    let results = runner.run(&mut op, &request).unwrap();
    let peaks: Vec<f64> = results
        .iter()
        .filter(|t| t.metric() == Metric::PeakMemory)
        .map(|t| t.value())
        .collect();
    assert_eq!(peaks.len(), 3);
    assert!(peaks.iter().all(|&p| p >= 1_000_000.0));
}
