//! Logging initialization for k3s-validator.
//!
//! Configures `tracing-subscriber` based on the `[general]` section
//! of `ValidatorConfig` and the trace tier selected on the command line.
//! Log lines go to stderr so that stdout carries only the report.

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use k3s_validator_core::TraceLevel;
use k3s_validator_core::config::GeneralConfig;

/// Filter directive for the configured level and trace tier.
///
/// `--verbose` and `--debug` need `debug` output from the validator crates;
/// `--debug-all` opens everything up to `trace`.
pub fn filter_directive(log_level: &str, trace: TraceLevel) -> String {
    match trace {
        TraceLevel::Off => log_level.to_owned(),
        TraceLevel::Verbose | TraceLevel::Debug => format!(
            "{log_level},k3s_validator=debug,k3s_validator_core=debug,k3s_validator_cluster=debug"
        ),
        TraceLevel::DebugAll => "trace".to_owned(),
    }
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
/// `RUST_LOG` takes precedence over both the config and the trace tier.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines
/// * `"pretty"` - Human-readable output (default)
pub fn init_tracing(config: &GeneralConfig, trace: TraceLevel) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(&config.log_level, trace)));

    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize JSON tracing subscriber: {}", e)
                })?;
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_writer(std::io::stderr),
                )
                .try_init()
                .map_err(|e| {
                    anyhow::anyhow!("failed to initialize pretty tracing subscriber: {}", e)
                })?;
        }
        _ => {
            return Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                config.log_format
            ));
        }
    }

    Ok(())
}
