//! Scoutflow - wiring shared by the CLI and its tests

pub mod bootstrap;

pub use bootstrap::{build_orchestrator, criteria_check, load_config, resolve_config_path};
