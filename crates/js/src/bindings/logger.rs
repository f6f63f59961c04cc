use super::values::LogLevel;

/// Sink for host-side diagnostics and `console.*` output from scripts.
pub trait HostLogger: Send + Sync {
    /// Log a message with a given level.
    fn log(&self, level: LogLevel, message: &str);
}
