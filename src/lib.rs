//! kiln - cached, staged builds for projects with installed dependencies
//!
//! kiln copies a project into a disposable workspace, restores its
//! dependency tree from a cache keyed by the manifest contents (or runs the
//! installer on a miss), then runs the compile, pack and export stages.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Business logic: project file, cache, pipeline, watch loop
//! - [`infra`] - Infrastructure layer (filesystem, locks, processes, sockets)
//! - [`config`] - Configuration defaults
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
