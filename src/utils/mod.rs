//! Utilities module for logging and error handling
//!
//! This module provides:
//! - Structured logging with tracing
//! - The crate-wide error type

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{HubError, Result, ResultExt};
pub use logging::{init_logging, LogConfig, LogLevel, TrainingLogger};
