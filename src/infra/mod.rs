//! Infrastructure layer
//!
//! Handles all I/O operations: filesystem, locks, external processes,
//! sockets and filesystem notifications.

pub mod dirs;
pub mod filesystem;
pub mod port;
pub mod process;
pub mod watcher;
pub mod workspace;
