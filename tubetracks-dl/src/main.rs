//! TubeTracks downloader - command-line entry point
//!
//! Resolves configuration, expands playlists, builds jobs from URLs and batch
//! files, runs the worker pool and prints a summary.
//!
//! Exit codes: 0 every job succeeded or was skipped, 1 some job failed, was
//! cancelled, had an invalid URL or an unlistable playlist, 2 fatal pool error
//! or startup failure.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tubetracks_common::config::{default_config_path, write_toml_config, TomlConfig};
use tubetracks_common::human_time::format_duration;
use tubetracks_common::logging::init_tracing;
use tubetracks_dl::cli::Cli;
use tubetracks_dl::extractors::{expand_playlists, YtDlpPlaylist};
use tubetracks_dl::job::{build_jobs, JobTemplate};
use tubetracks_dl::{
    ArchiveStore, ExtractorRegistry, JobStatus, PipelineEvent, ReportCollector, RetryPolicy,
    SharedArchive, WorkerPool,
};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (mut config, source) = TomlConfig::resolve(cli.config.as_deref())?;
    config.apply_env_overrides()?;
    cli.apply_to(&mut config);
    config.validate()?;

    init_tracing(&config.logging, cli.log_level_override())?;

    // Build identification first
    info!(
        "tubetracks v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &source {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    if let Some(target) = &cli.write_config {
        let path = target
            .clone()
            .or_else(|| source.clone())
            .or_else(default_config_path)
            .ok_or_else(|| anyhow!("No configuration path available, pass --write-config FILE"))?;
        write_toml_config(&config, &path)?;
        println!("Wrote configuration to {}", path.display());
        if cli.urls.is_empty() && cli.batch_files.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }
    }

    let urls = cli.collect_urls()?;
    if urls.is_empty() {
        bail!("No URLs given; pass URLs or --batch-file FILE");
    }

    let playlists = YtDlpPlaylist::new(config.ytdlp_path.clone());
    let expansion = expand_playlists(urls, &playlists).await;
    for (url, e) in &expansion.failed {
        eprintln!("playlist: {} ({})", url, e);
    }

    let template = JobTemplate {
        format: config.format,
        quality: config.quality,
        dest_dir: config.output_dir.clone(),
    };
    let (jobs, rejected) = build_jobs(&expansion.urls, &template);
    for (url, e) in &rejected {
        warn!(url = %url, error = %e, "Skipping invalid URL");
        eprintln!("invalid: {} ({})", url, e);
    }

    let archive = open_archive(&config);
    let registry = ExtractorRegistry::with_defaults(&config)?;
    info!(
        jobs = jobs.len(),
        format = %config.format,
        quality = %config.quality,
        output_dir = %config.output_dir.display(),
        extractors = ?registry.names(),
        "Prepared download batch"
    );

    let cancel_token = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel_token.clone()));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let progress = tokio::spawn(show_progress(events_rx, jobs.len(), cli.quiet));

    let mut pool = WorkerPool::new(Arc::new(registry), RetryPolicy::from_config(&config.retry))
        .with_attempt_timeout(Duration::from_secs(config.attempt_timeout_secs))
        .with_cancel_grace(Duration::from_secs(config.cancel_grace_secs))
        .with_cancel_token(cancel_token)
        .with_events(events_tx);
    if let Some(archive) = &archive {
        pool = pool.with_archive(archive.clone());
    }

    let started = Instant::now();
    let outcome = pool.run(jobs, config.concurrency).await;
    // Closes the event channel so the progress task finishes
    drop(pool);
    let collector = progress.await.context("Progress task failed")?;

    if let Some(archive) = &archive {
        if let Err(e) = archive.lock().await.flush() {
            warn!(error = %e, "Download archive could not be flushed");
        }
    }

    let summary = collector.summary();
    println!("{} in {}", summary.display_string(), format_duration(started.elapsed()));
    for line in collector.failure_lines() {
        println!("  failed: {}", line);
    }

    if let Some(path) = &cli.report {
        collector
            .write_json(path)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    if let Some(fatal) = &outcome.fatal {
        error!(error = %fatal, "Run halted by fatal error");
        eprintln!("Fatal: {}", fatal);
        return Ok(ExitCode::from(2));
    }

    if summary.is_clean() && rejected.is_empty() && expansion.failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

/// Load the archive; failures leave the run without one
fn open_archive(config: &TomlConfig) -> Option<SharedArchive> {
    let path: PathBuf = config.effective_archive_path()?;
    match ArchiveStore::load(&path) {
        Ok(store) => Some(store.into_shared()),
        Err(e) => {
            warn!(error = %e, "Continuing without download archive");
            None
        }
    }
}

/// Print one line per finished job and collect the results
async fn show_progress(
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
    total: usize,
    quiet: bool,
) -> ReportCollector {
    let mut collector = ReportCollector::new();

    while let Some(event) = events.recv().await {
        match event {
            PipelineEvent::Finished(result) => {
                if !quiet {
                    let detail = match result.status {
                        JobStatus::Success => result
                            .output_path
                            .as_ref()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        JobStatus::Skipped => "already downloaded".to_string(),
                        JobStatus::Failed | JobStatus::Cancelled => result
                            .error
                            .map(|k| k.to_string())
                            .unwrap_or_default(),
                    };
                    println!(
                        "[{}/{}] {:<9} {} {}",
                        collector.results().len() + 1,
                        total,
                        result.status.as_str(),
                        result.source_url,
                        detail
                    );
                }
                collector.add(result);
            }
            PipelineEvent::RetryScheduled {
                job_id,
                attempt,
                delay,
                error,
            } => {
                if !quiet {
                    println!(
                        "        retry     {} attempt {} failed ({}), retrying in {}",
                        job_id.short(),
                        attempt,
                        error.kind,
                        format_duration(delay)
                    );
                }
            }
            PipelineEvent::AttemptStarted { .. } => {}
        }
    }

    collector
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling downloads");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling downloads");
        },
    }
    token.cancel();
}
