//! Host settings read from the environment.
//!
//! These tune the host process only; the module's own configuration comes
//! from the command line.

use crate::error::BootstrapError;
use crate::loader::MODULE_FILE_NAME;
use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;

/// Overrides the module path.
pub const MODULE_PATH_VAR: &str = "BADGE_MODULE_PATH";
/// Worker threads for the network runtime.
pub const NET_THREADS_VAR: &str = "BADGE_NET_THREADS";

const DEFAULT_NET_THREADS: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostSettings {
    /// Module file to load instead of the one next to the executable.
    pub module_path: Option<PathBuf>,
    /// Tokio worker threads for sockets and HTTP (minimum 1).
    pub net_threads: usize,
}

impl HostSettings {
    pub fn new(module_path: Option<PathBuf>, net_threads: usize) -> Self {
        Self {
            module_path,
            net_threads: net_threads.max(1),
        }
    }

    /// Load settings from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `BADGE_MODULE_PATH`: module file (default: `flashproxy.js` next to the executable)
    /// - `BADGE_NET_THREADS`: network worker threads (default: 2)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var_os(key))
    }

    /// Load settings through `lookup`; empty and malformed values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let module_path = lookup(MODULE_PATH_VAR)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let net_threads = lookup(NET_THREADS_VAR)
            .and_then(|value| value.into_string().ok())
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_NET_THREADS);
        Self::new(module_path, net_threads)
    }

    /// The module file to read.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Io`] if no override is set and the location of
    /// the running executable cannot be determined.
    pub fn module_path(&self) -> Result<PathBuf, BootstrapError> {
        if let Some(path) = &self.module_path {
            return Ok(path.clone());
        }
        let executable = env::current_exe().map_err(|source| BootstrapError::Io {
            path: PathBuf::from(MODULE_FILE_NAME),
            source,
        })?;
        executable
            .parent()
            .map(|dir| dir.join(MODULE_FILE_NAME))
            .ok_or_else(|| BootstrapError::Io {
                path: executable.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "executable has no parent directory"),
            })
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self::new(None, DEFAULT_NET_THREADS)
    }
}
