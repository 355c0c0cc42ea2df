//! Doubles a million integers two ways and prints the timings side by side.
//!
//! ```text
//! RUST_LOG=comparo=info cargo run --release --example doubling
//! ```
use std::error::Error;

use comparo::{
    Comparison, MetricRequest, Reporter, TableReporter, TrialCount, TrialRunner,
    macros::operations,
};
use tracing_subscriber::EnvFilter;

fn double_loop(data: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(data.len());
    for v in data {
        out.push(v * 2);
    }
    out
}

fn double_vectorized(data: &[i64]) -> Vec<i64> {
    data.iter().map(|v| v * 2).collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let data: Vec<i64> = (0..1_000_000).collect();

    let mut comparison = Comparison::builder()
        .title("Doubling 1,000,000 integers")
        .operations(operations! {
            double_loop(&data);
            double_vectorized(&data);
        })
        .metrics(MetricRequest::elapsed_time())
        .runner(TrialRunner::builder().trials(TrialCount::Fixed(50)).build())
        .build();

    let report = comparison.run()?;
    TableReporter.report(&report, &mut std::io::stdout())?;
    Ok(())
}
