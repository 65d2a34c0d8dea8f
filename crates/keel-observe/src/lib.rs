//! # keel-observe
//!
//! Process-wide `tracing` bootstrap: text or JSON on stdout with RFC 3339 local
//! timestamps, or native journald entries behind the `journald` feature.

mod config;
mod error;
mod format;
mod init;

pub use config::LoggerConfig;
pub use error::LoggerError;
pub use format::LoggerFormat;
pub use init::logger_init;
