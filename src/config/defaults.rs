//! Default configuration values

/// Directory for promoted artifacts and stage logs
pub const STATE_DIR: &str = ".kiln";

/// Directory the final bundle is exported to
pub const EXPORT_DIR: &str = "out";

/// Directory produced by the dependency installer
pub const DEPENDENCIES_DIR: &str = "node_modules";

/// Installer timeout (in seconds)
pub const INSTALL_TIMEOUT_SECS: u64 = 600;

/// Compile and pack timeout (in seconds)
pub const STAGE_TIMEOUT_SECS: u64 = 300;

/// Timeout for in-process stages (workspace copy, cache restore, export)
pub const IN_PROCESS_TIMEOUT_SECS: u64 = 600;

/// Trailing debounce window for watch mode (in milliseconds)
pub const DEBOUNCE_MS: u64 = 200;

/// Preferred dev server port
pub const SERVE_PORT: u16 = 9999;

/// Number of ports scanned for the dev server
pub const SERVE_PORT_COUNT: u16 = 100;

/// Address checked for a free dev server port
pub const SERVE_HOST: &str = "127.0.0.1";

/// Bytes of stage output kept in reports; the log file has everything
pub const OUTPUT_TAIL_BYTES: usize = 4096;

/// Cache entry kind for installed dependencies
pub const VENDOR_KIND: &str = "vendor";
