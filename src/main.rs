//! EventFlow - command line entry point
//!
//! Runs a pipeline over synthetic detector traces and writes one JSON line
//! per accepted event.
//!
//! ```text
//! eventflow [PIPELINE.toml] [OUTPUT.jsonl] [EVENTS]
//! ```
//!
//! Without a pipeline file a built-in SampleAnalysis → PulseFinder chain is
//! used. Without an output file rows go to stdout.

use anyhow::Context;
use eventflow_rs::{
    EngineContext, JsonLinesSink, PipelineConfig, ProcessRunner, ResultSink, StageConfig,
    SyntheticConfig, SyntheticSource,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn default_pipeline() -> PipelineConfig {
    PipelineConfig::new(vec![
        StageConfig::new("SampleAnalysis", "sAna")
            .with_observable("baseline", "double", "mean of the baseline window")
            .with_observable("sum", "double", "integral above baseline")
            .with_observable("max", "double", "highest sample")
            .with_parameter("baseline_samples", 64),
        StageConfig::new("PulseFinder", "pf")
            .with_observable("n_pulses", "int", "pulses above threshold")
            .with_observable("amplitudes", "vector<double>", "pulse heights")
            .with_parameter("threshold", 15.0)
            .with_parameter("min_width", 2),
    ])
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays clean for rows
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,eventflow_rs=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let pipeline_path = args.next();
    let output_path = args.next();
    let events: u64 = match args.next() {
        Some(n) => n.parse().with_context(|| format!("Invalid event count '{}'", n))?,
        None => SyntheticConfig::default().events,
    };

    let config = match &pipeline_path {
        Some(path) => {
            tracing::info!("Loading pipeline from {}", path);
            PipelineConfig::load(path).with_context(|| format!("Cannot load pipeline {}", path))?
        }
        None => {
            tracing::info!("No pipeline given, using the built-in pulse analysis");
            default_pipeline()
        }
    };

    let sink: Box<dyn ResultSink> = match &output_path {
        Some(path) => Box::new(
            JsonLinesSink::create(path).with_context(|| format!("Cannot create {}", path))?,
        ),
        None => Box::new(JsonLinesSink::stdout()),
    };
    let source = SyntheticSource::new(SyntheticConfig {
        events,
        ..SyntheticConfig::default()
    });

    let runner = ProcessRunner::new(config, EngineContext::default());
    let summary = match runner.run(Box::new(source), sink) {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("Run aborted: {}", e);
            std::process::exit(1);
        }
    };

    for report in &summary.workers {
        tracing::info!(
            "Worker {}: {} processed, {} accepted, {} stage(s) with warnings",
            report.worker,
            report.processed,
            report.accepted,
            report.stages_with_warnings
        );
    }
    tracing::info!(
        "Done: {} events read, {} written, {} discarded",
        summary.events_read,
        summary.events_written,
        summary.events_discarded
    );
    Ok(())
}
