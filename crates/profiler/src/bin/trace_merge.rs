//! Merge per-process WALs and traces into one trace document.
//!
//! ```text
//! trace-merge <out.json> <input>...
//! ```
//!
//! Set `RUST_LOG=debug` for progress output.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: trace-merge <out.json> <input>...";

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args_os().skip(1).map(PathBuf::from);
    let out = args.next();
    let inputs: Vec<PathBuf> = args.collect();
    let Some(out) = out.filter(|_| !inputs.is_empty()) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match run(&out, &inputs) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Failed to merge traces: {:#}", e);
            eprintln!("trace-merge: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(out: &Path, inputs: &[PathBuf]) -> anyhow::Result<()> {
    let mut metadata = BTreeMap::new();
    metadata.insert("tool".to_string(), json!("trace-merge"));

    let report = profiler::merge_files(inputs, metadata).context("merging inputs")?;
    if report.inputs_merged == 0 {
        bail!("none of the {} inputs could be read", inputs.len());
    }

    profiler::write_trace(out, &report.document)
        .with_context(|| format!("writing {}", out.display()))?;

    tracing::info!(
        out = %out.display(),
        inputs = report.inputs_merged,
        skipped_inputs = report.skipped_inputs.len(),
        skipped_lines = report.skipped_lines.len(),
        "Merged trace written"
    );
    Ok(())
}
