//! Shared plumbing for the harvest workspace.
//!
//! Holds the `tracing` bootstrap used by the binary and by integration tests so
//! every crate logs through the same sink and filter conventions.
//!
//! ```rust
//! use harvest_common::observability::{LogConfig, LogFormat};
//!
//! let cfg = LogConfig {
//!     format: LogFormat::Json,
//!     ..LogConfig::default()
//! };
//! assert_eq!(cfg.app_name, "harvest");
//! assert_eq!(cfg.default_filter, "info");
//! ```
pub mod observability;

pub use observability::{init_logging, LogConfig, LogFormat};
