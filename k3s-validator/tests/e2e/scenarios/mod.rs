//! E2E test scenarios.

mod connection_loss;
mod dry_run;
mod external_modules;
mod fault_isolation;
mod healthy_run;
mod missing_module;
mod parallel;
mod shutdown;
mod timeouts;
