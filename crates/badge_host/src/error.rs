//! Failures that stop the badge host.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong between reading the module and the event loop
/// going idle. Engine diagnostics are carried as-is.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// The module file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The engine or its network runtime could not be set up.
    #[error("{0}")]
    Engine(anyhow::Error),
    /// Evaluating the module failed.
    #[error("{0}")]
    Load(anyhow::Error),
    /// The factory was missing or not callable, or `start()` threw.
    #[error("{0}")]
    Lifecycle(anyhow::Error),
    /// `start` was requested a second time.
    #[error("badge instance already started")]
    AlreadyStarted,
    /// A timer or I/O callback threw after start.
    #[error("{0}")]
    Runtime(anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn engine_text_is_not_decorated() {
        let error = BootstrapError::Load(anyhow!("Uncaught SyntaxError: Unexpected token '('"));
        assert_eq!(error.to_string(), "Uncaught SyntaxError: Unexpected token '('");
    }

    #[test]
    fn io_failure_names_the_path() {
        let error = BootstrapError::Io {
            path: PathBuf::from("/opt/badge/flashproxy.js"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let text = error.to_string();
        assert!(text.starts_with("failed to read /opt/badge/flashproxy.js: "), "{text}");
    }
}
