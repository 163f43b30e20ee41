use anyhow::{Context, Result};
use bootstrap::Harvest;
use clap::Parser;
use harvest_common::observability::init_logging;
use harvest_config::HarvestConfigLoader;
use harvest_ingest::{BatchReport, SubjectStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
mod bootstrap;

/// Page through X profile timelines into a local document store.
#[derive(Debug, Parser)]
#[command(name = "harvest", version, about)]
struct Args {
    /// YAML configuration file.
    #[arg(long, env = "HARVEST_CONFIG", default_value = "harvest.yaml")]
    config: PathBuf,

    /// Account to ingest (repeatable); replaces `ingest.subjects`.
    #[arg(long = "subject", value_name = "SCREEN_NAME")]
    subjects: Vec<String>,

    /// Write the batch report as JSON to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut cfg = HarvestConfigLoader::new()
        .with_file(&args.config)
        .load()
        .with_context(|| format!("loading {}", args.config.display()))?;
    if !args.subjects.is_empty() {
        cfg.set_subjects(&args.subjects);
    }
    cfg.validate()?;

    let log_path = init_logging(cfg.logging.to_log_config())?;
    tracing::info!(
        config = %args.config.display(),
        log = %log_path.display(),
        subjects = ?cfg.ingest.subjects,
        "harvest.start"
    );

    let cancel = CancellationToken::new();
    let harvest = Harvest::build(&cfg, cancel.clone()).await?;

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("harvest.shutdown_requested");
            on_signal.cancel();
        }
    });

    let report = harvest.run().await?;
    log_report(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }

    Ok(if report.failed() == 0 && !report.cancelled {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn log_report(report: &BatchReport) {
    for outcome in &report.outcomes {
        match &outcome.status {
            SubjectStatus::Completed { summary } => tracing::info!(
                subject = %outcome.subject,
                items = summary.items(),
                categories = summary.categories.len(),
                "harvest.subject.completed"
            ),
            SubjectStatus::Failed { reason, partial } => tracing::error!(
                subject = %outcome.subject,
                reason = %reason,
                stored = partial.as_ref().map_or(0, |s| s.items()),
                "harvest.subject.failed"
            ),
            SubjectStatus::Skipped => {
                tracing::warn!(subject = %outcome.subject, "harvest.subject.skipped")
            }
        }
    }
    tracing::info!(
        run_id = %report.run_id,
        succeeded = report.succeeded(),
        failed = report.failed(),
        items = report.items_total(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "harvest.done"
    );
}
