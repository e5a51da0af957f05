//! E2E tests for the k3s-validator runner.
//!
//! Whole runs go through the [`Orchestrator`](k3s_validator::Orchestrator)
//! against an in-memory `SimulatedCluster`: fixture lifecycle, discovery
//! fallbacks, fault isolation, interruption and reporting.
//!
//! # Test Structure
//!
//! - `helpers/` -- run builders, test modules and suite assertions
//! - `scenarios/` -- one file per scenario
//!
//! # Running
//!
//! ```bash
//! cargo test -p k3s-validator --test e2e
//! ```

mod helpers;
mod scenarios;
