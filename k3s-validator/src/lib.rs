//! K3s cluster validation runner.
//!
//! Resolves the selected test modules, runs them against a cluster inside a
//! disposable namespace and renders the aggregated results.
//!
//! - [`cli`]: command-line arguments
//! - [`logging`]: `tracing-subscriber` initialization
//! - [`module`]: the `TestModule` trait and module metadata
//! - [`context`]: what a running module sees (`ModuleContext`, `Verdict`)
//! - [`modules`]: registry, discovery and every built-in module
//! - [`orchestrator`]: run lifecycle and category dispatch
//! - [`report`]: text, JSON and HTML rendering

pub mod cli;
pub mod context;
pub mod error;
pub mod logging;
pub mod module;
pub mod modules;
pub mod orchestrator;
pub mod report;

pub use error::ModuleError;
pub use modules::{ModuleRegistry, PlanEntry};
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome, RunState};
