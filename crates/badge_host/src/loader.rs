//! Reading the badge module and running it inside the synthesized environment.

use crate::environment::HostEnvironment;
use crate::error::BootstrapError;
use js::{HostContext, JsEngine};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// File name of the module, looked up next to the executable.
pub const MODULE_FILE_NAME: &str = "flashproxy.js";

const ENVIRONMENT_URL: &str = "badge://environment";

/// Fails unless the prelude and the host namespaces are both visible.
const ENVIRONMENT_CHECK: &str = "if (typeof window === 'undefined' || typeof window.WebSocket !== 'function' \
     || typeof location === 'undefined' || typeof navigator === 'undefined') { \
     throw new Error('browser environment is incomplete'); }";

/// The module's path and full text.
#[derive(Clone, Debug)]
pub struct ModuleSource {
    path: PathBuf,
    text: String,
}

impl ModuleSource {
    /// Read the whole module from `path`.
    ///
    /// # Errors
    /// Returns [`BootstrapError::Io`] if the file cannot be read as UTF-8 text.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, BootstrapError> {
        let path = path.as_ref().to_path_buf();
        match fs::read_to_string(&path) {
            Ok(text) => {
                debug!("read {} bytes from {}", text.len(), path.display());
                Ok(Self { path, text })
            }
            Err(source) => Err(BootstrapError::Io { path, source }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Script URL reported in stack traces: a `file:` URL when the path is absolute.
    pub fn url(&self) -> String {
        Url::from_file_path(&self.path)
            .map_or_else(|()| self.path.display().to_string(), String::from)
    }
}

/// Proof that the host environment has been installed into an engine.
///
/// Only [`install_environment`] creates one, and [`evaluate`] requires it.
#[derive(Debug)]
pub struct InstalledEnvironment {
    _private: (),
}

/// Install the environment's bindings and the runtime prelude into `engine`.
///
/// # Errors
/// Returns [`BootstrapError::Engine`] if the bindings cannot be installed or
/// the resulting globals are incomplete.
pub fn install_environment<E: JsEngine + ?Sized>(
    engine: &mut E,
    environment: &HostEnvironment,
    context: &HostContext,
) -> Result<InstalledEnvironment, BootstrapError> {
    engine
        .install_bindings(context, &environment.bindings())
        .map_err(BootstrapError::Engine)?;
    engine
        .eval_script(ENVIRONMENT_CHECK, ENVIRONMENT_URL)
        .map_err(BootstrapError::Engine)?;
    debug!("environment installed: location.search={}", environment.location_search());
    Ok(InstalledEnvironment { _private: () })
}

/// Evaluate the module source once in the global scope and flush microtasks.
///
/// # Errors
/// Returns [`BootstrapError::Load`] with the engine's diagnostic if evaluation throws.
pub fn evaluate<E: JsEngine + ?Sized>(
    engine: &mut E,
    _installed: &InstalledEnvironment,
    module: &ModuleSource,
) -> Result<(), BootstrapError> {
    engine
        .eval_script(module.text(), &module.url())
        .map_err(BootstrapError::Load)?;
    engine.run_jobs().map_err(BootstrapError::Load)?;
    info!("loaded {}", module.path().display());
    Ok(())
}
