//! CLI argument definitions for k3s-validator.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::{ArgGroup, Parser, ValueEnum};

use k3s_validator_core::{Category, ReportFormat, TraceLevel};

/// K3s cluster validation suite.
///
/// Creates a temporary test namespace, runs the selected test categories
/// against the current kubeconfig context and reports the results.
#[derive(Parser, Debug)]
#[command(name = "k3s-validator")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("selection").args(["categories", "all"])))]
pub struct ValidatorCli {
    /// Categories to run. Optional with --dry-run, which then plans every category.
    #[arg(value_enum, required_unless_present_any = ["all", "dry_run"])]
    pub categories: Vec<CategoryArg>,

    /// Run every category.
    #[arg(long)]
    pub all: bool,

    /// Path to a k3s-validator.toml configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Final report format.
    #[arg(long, value_enum, default_value_t = ReportFormatArg::Text)]
    pub report_format: ReportFormatArg,

    /// Write the final report to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Run categories concurrently (modules within a category stay sequential).
    #[arg(long)]
    pub parallel: bool,

    /// Print the execution plan without contacting the cluster.
    #[arg(long)]
    pub dry_run: bool,

    /// Trace module entry/exit and retries.
    #[arg(long)]
    pub verbose: bool,

    /// Also echo every cluster command.
    #[arg(long)]
    pub debug: bool,

    /// Also dump call stacks, safe-mode transitions and values.
    #[arg(long)]
    pub debug_all: bool,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,
}

impl ValidatorCli {
    /// Selected categories in the order given, without duplicates.
    ///
    /// `--all`, or no selection at all (only accepted with `--dry-run`),
    /// yields every category.
    pub fn selected_categories(&self) -> Vec<Category> {
        if self.all || self.categories.is_empty() {
            return Category::ALL.to_vec();
        }
        let mut selected = Vec::with_capacity(self.categories.len());
        for category in self.categories.iter().map(|c| c.into_category()) {
            if !selected.contains(&category) {
                selected.push(category);
            }
        }
        selected
    }

    /// The highest tracing tier requested.
    pub fn trace_level(&self) -> TraceLevel {
        if self.debug_all {
            TraceLevel::DebugAll
        } else if self.debug {
            TraceLevel::Debug
        } else if self.verbose {
            TraceLevel::Verbose
        } else {
            TraceLevel::Off
        }
    }
}

/// Category names accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CategoryArg {
    Core,
    K3sSpecific,
    Performance,
    Security,
    Failure,
    Production,
}

impl CategoryArg {
    pub fn into_category(self) -> Category {
        match self {
            Self::Core => Category::Core,
            Self::K3sSpecific => Category::K3sSpecific,
            Self::Performance => Category::Performance,
            Self::Security => Category::Security,
            Self::Failure => Category::Failure,
            Self::Production => Category::Production,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormatArg {
    Text,
    Json,
    Html,
}

impl From<ReportFormatArg> for ReportFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Text => ReportFormat::Text,
            ReportFormatArg::Json => ReportFormat::Json,
            ReportFormatArg::Html => ReportFormat::Html,
        }
    }
}
