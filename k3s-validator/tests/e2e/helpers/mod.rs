//! Shared E2E test helpers.

pub mod modules;
pub mod runs;
