//! k3s-validator - K3s cluster validation suite.
//!
//! Entry point that wires config, logging, the cluster client and the
//! orchestrator together.
//!
//! # Exit codes
//!
//! - `0`: no failed tests (warnings and skips allowed), or a dry run
//! - `1`: failed tests, unreachable cluster, invalid configuration or an
//!   interrupted run

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use k3s_validator::cli::ValidatorCli;
use k3s_validator::logging::init_tracing;
use k3s_validator::modules::ModuleRegistry;
use k3s_validator::orchestrator::{Orchestrator, RunOptions};
use k3s_validator::report::{self, TextStreamObserver};
use k3s_validator_cluster::KubeClusterClient;
use k3s_validator_core::{ReportFormat, ResultObserver, ValidatorConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ValidatorCli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!(error = %e, "k3s-validator failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: ValidatorCli) -> Result<u8> {
    let config = load_config(&cli).await?;
    let trace = cli.trace_level();
    init_tracing(&config.general, trace)?;

    let format = ReportFormat::from(cli.report_format);
    let output = output_path(&cli, &config);
    let options = RunOptions {
        categories: cli.selected_categories(),
        parallel: cli.parallel,
        trace_level: trace,
    };

    tracing::info!(
        categories = ?options.categories,
        parallel = options.parallel,
        format = %format,
        dry_run = cli.dry_run,
        "k3s-validator starting"
    );

    let orchestrator: Orchestrator<KubeClusterClient> =
        Orchestrator::new(config, ModuleRegistry::with_builtin_modules(), options);

    if cli.dry_run {
        let plan = orchestrator.plan();
        write_output(output.as_deref(), |w| report::render_plan(&plan, format, w))?;
        tracing::info!(modules = plan.len(), "dry run complete");
        return Ok(0);
    }

    let client = match KubeClusterClient::connect().await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to cluster");
            eprintln!("Error: {e}");
            return Ok(1);
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(signal) => {
                tracing::warn!(signal = signal, "interrupt received, cancelling run");
                signal_token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "signal handling unavailable"),
        }
    });

    // Text results stream to stdout while the run is in progress.
    let streaming = format == ReportFormat::Text;
    let observer: Option<Box<dyn ResultObserver>> = if streaming {
        Some(Box::new(TextStreamObserver::stdout()))
    } else {
        None
    };

    let outcome = match orchestrator.run(client, shutdown, observer).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {e}");
            return Ok(1);
        }
    };

    let suite = &outcome.suite;
    match output.as_deref() {
        Some(path) => write_output(Some(path), |w| report::render(suite, format, w))?,
        None if streaming => write_output(None, |w| report::render_summary(suite, w))?,
        None => write_output(None, |w| report::render(suite, format, w))?,
    }

    if outcome.interrupted {
        eprintln!("Run interrupted, results are incomplete.");
    }
    if let Some(reason) = &outcome.aborted {
        eprintln!("Run aborted: {reason}");
    }

    Ok(if outcome.is_success() { 0 } else { 1 })
}

/// Config file when given, otherwise defaults; env overrides and CLI log
/// options are applied on top.
async fn load_config(cli: &ValidatorCli) -> Result<ValidatorConfig> {
    let mut config = match &cli.config {
        Some(path) => ValidatorConfig::load(path)
            .await
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let mut config = ValidatorConfig::default();
            config.apply_env_overrides();
            config.validate().context("invalid configuration")?;
            config
        }
    };

    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    Ok(config)
}

fn output_path(cli: &ValidatorCli, config: &ValidatorConfig) -> Option<PathBuf> {
    cli.output.clone().or_else(|| {
        (!config.report.output.is_empty()).then(|| PathBuf::from(&config.report.output))
    })
}

fn write_output(
    path: Option<&Path>,
    render: impl FnOnce(&mut dyn Write) -> io::Result<()>,
) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create report file {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            render(&mut writer)
                .and_then(|()| writer.flush())
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            render(&mut handle)
                .and_then(|()| handle.flush())
                .context("failed to write report to stdout")?;
        }
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
