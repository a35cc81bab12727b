//! Telemetry and logging infrastructure
//!
//! Structured logging with tracing; every component logs through the
//! `tracing` macros and the process picks the output here.

pub mod logging;

pub use logging::{init_logging, ConsoleFormat, LogConfig, LogGuard, LogInitError};
