//! Execution of a single dequeued job: script → toolchain → sink → channel.

use anyhow::{Context, Result};
use std::fmt::Display;
use tracing::{info, warn};

use super::artifacts::{self, ArtifactPaths};
use super::models::{JobSpec, ListJob};
use super::runner::ProcessRunner;
use super::script::ScriptGenerator;
use super::sink::LineSink;
use super::stream::ResultSender;
use super::tree::{DeviceMatch, TreeBuilder, TreeSnapshot};
use crate::config::AppConfig;

/// Format a labeled multi-line diagnostic block.
pub fn diagnostic_block(label: &str, detail: impl Display) -> String {
    format!("===== {} =====\n{}", label, detail)
}

/// Run `spec` to completion, reporting everything through `results`.
///
/// Never fails: every error ends up as text in the live stream (and in the
/// job log once one exists). The caller is responsible for the end marker.
pub async fn execute(spec: &JobSpec, config: &AppConfig, results: &ResultSender) {
    let kind = spec.kind();
    let timestamp = artifacts::timestamp();

    let (paths, log_file) =
        match ArtifactPaths::allocate(&config.script_dir, &config.log_dir, kind, &timestamp).await
        {
            Ok(allocated) => allocated,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to allocate job artifacts");
                results.log(diagnostic_block("Runtime Fault", format!("{:#}", e)));
                return;
            }
        };

    let mut sink = LineSink::new(log_file, &paths.log_path);
    if let JobSpec::List(job) = spec {
        sink = sink.with_tree(TreeBuilder::new(&job.server));
    }

    if let Err(e) = run(spec, config, &paths, &mut sink, results).await {
        warn!(error = %format!("{:#}", e), log = %paths.log_path.display(), "Job failed");
        let block = diagnostic_block("Runtime Fault", format!("{:#}", e));
        sink.record(&block).await;
        results.log(block);
    }

    info!(
        log = %sink.log_path().display(),
        lines = sink.lines_logged(),
        consumer_gone = results.is_consumer_gone(),
        "Job finished"
    );
}

async fn run(
    spec: &JobSpec,
    config: &AppConfig,
    paths: &ArtifactPaths,
    sink: &mut LineSink,
    results: &ResultSender,
) -> Result<()> {
    let kind = spec.kind();
    let runner = ProcessRunner::new(&config.shell, config.toolchain(kind));

    if let Err(e) = runner.check_precondition() {
        warn!(error = %e, "Toolchain precondition failed");
        forward(sink, results, &format!("ERROR: {}", e)).await;
        return Ok(());
    }

    let script = ScriptGenerator::new(&config.script_dir)
        .generate(spec, &paths.stem)
        .await?;

    results.log(format!("Log file: {}", paths.log_path.display()));
    results.log(format!("Script file: {}", script.display()));

    let mut process = runner
        .spawn(&script)
        .with_context(|| format!("Failed to start {} toolchain", kind))?;
    info!(pid = ?process.id(), script = %script.display(), "Toolchain started");

    while let Some(line) = process.next_line().await? {
        if let Some(visible) = sink.accept(&line).await {
            results.log(visible);
        }
    }

    let status = process.wait().await?;
    info!(exit_code = ?status.code(), success = status.success(), "Toolchain exited");
    sink.record(&format!("Toolchain exited with {}", status)).await;

    forward(sink, results, kind.finished_banner()).await;

    if let JobSpec::List(job) = spec {
        if let Some(tree) = sink.take_tree() {
            for line in address_book_report(job, &tree) {
                forward(sink, results, &line).await;
            }
            results.tree(tree);
        }
    }

    Ok(())
}

async fn forward(sink: &mut LineSink, results: &ResultSender, line: &str) {
    if let Some(visible) = sink.accept(line).await {
        results.log(visible);
    }
}

/// One line per expected target describing which live device it resolves to.
fn address_book_report(job: &ListJob, tree: &TreeSnapshot) -> Vec<String> {
    job.expected
        .iter()
        .map(|target| {
            let path = target.full_path(&job.server);
            match tree.resolve(target) {
                DeviceMatch::Found(device) => format!(
                    "Target {}: device '{}' -> {}",
                    path, target.device, device
                ),
                DeviceMatch::NoDevice => format!(
                    "Target {}: FAILED, no device matching '{}'",
                    path, target.device
                ),
                DeviceMatch::NoTarget => format!("Target {}: FAILED, target not found", path),
            }
        })
        .collect()
}
