//! Core business logic module
//!
//! # Submodules
//!
//! - [`project`] - Project file (kiln.toml) parsing and validation
//! - [`fingerprint`] - Manifest fingerprinting
//! - [`cache`] - Dependency cache store
//! - [`stage`] - Stage definitions and run records
//! - [`pipeline`] - Build orchestration
//! - [`watch`] - Debounced rebuild scheduling
//! - [`init`] - Project initialization logic
//! - [`clean`] - Clean generated directories
//! - [`global_config`] - Global configuration management

pub mod cache;
pub mod clean;
pub mod fingerprint;
pub mod global_config;
pub mod init;
pub mod pipeline;
pub mod project;
pub mod stage;
pub mod watch;
