//! Log-backed console for the JS facade.
//!
//! Output from script `console.*` calls and engine error reporting is routed
//! through the `log` crate so the host's logger decides what is shown.

use crate::bindings::{HostLogger, LogLevel};
use log::{debug, error, info, warn};

/// Console provides helper functions to print messages emitted by the JS
/// runtime and the engine itself.
pub struct Console;

impl Console {
    /// Log a debug line.
    #[inline]
    pub fn debug<M: AsRef<str>>(message: M) {
        debug!("[JS]: {}", message.as_ref());
    }

    /// Log an informational line.
    #[inline]
    pub fn info<M: AsRef<str>>(message: M) {
        info!("[JS]: {}", message.as_ref());
    }

    /// Log a warning line.
    #[inline]
    pub fn warn<M: AsRef<str>>(message: M) {
        warn!("[JS]: {}", message.as_ref());
    }

    /// Log an error line.
    #[inline]
    pub fn error<M: AsRef<str>>(message: M) {
        error!("[JS]: {}", message.as_ref());
    }

    /// Log an uncaught exception with its optional stack trace.
    #[inline]
    pub fn exception<M: AsRef<str>>(message: M, stack: Option<&str>) {
        match stack {
            Some(stack_trace) if !stack_trace.is_empty() => {
                error!("[JS]: {}\n{}", message.as_ref(), stack_trace);
            }
            _ => {
                error!("[JS]: {}", message.as_ref());
            }
        }
    }
}

/// A `HostLogger` implementation that routes to the `Console` helpers.
pub struct ConsoleLogger;

impl HostLogger for ConsoleLogger {
    #[inline]
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace | LogLevel::Debug => Console::debug(message),
            LogLevel::Info => Console::info(message),
            LogLevel::Warn => Console::warn(message),
            LogLevel::Error => Console::error(message),
        }
    }
}
