//! Host process for the flash proxy badge.
//!
//! Runs the unmodified browser module outside a browser: the configuration
//! string becomes `location.search`, the browser globals the module expects are
//! installed into a V8 context, the module is evaluated once, its factory and
//! `start()` are called, and the event loop keeps timers, sockets and HTTP
//! requests moving until nothing is left to wait for.

pub mod config;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod settings;

#[cfg(test)]
mod test_support;

pub use config::{
    BadgeOptions, ConfigWarning, ConfigurationString, DEFAULT_CONFIGURATION, resolve_configuration,
};
pub use environment::{HostEnvironment, USER_AGENT};
pub use error::BootstrapError;
pub use lifecycle::{FACTORY_SYMBOL, LifecycleInvoker, LifecycleState, START_METHOD};
pub use loader::{InstalledEnvironment, ModuleSource, evaluate, install_environment};
pub use settings::HostSettings;

use anyhow::Context as _;
use js::{EventLoop, JsEngine, TungsteniteConnector};
use js_engine_v8::V8Engine;
use log::{debug, info};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle};

/// Load, start and drive the module read from `settings` with a fresh V8 engine.
///
/// The module file is read before any engine exists.
///
/// # Errors
/// Returns the first failure of any stage; see [`BootstrapError`].
pub fn run(settings: &HostSettings, configuration: &ConfigurationString) -> Result<(), BootstrapError> {
    let module = ModuleSource::read(settings.module_path()?)?;

    let runtime = Builder::new_multi_thread()
        .worker_threads(settings.net_threads)
        .thread_name("badge-net")
        .enable_all()
        .build()
        .context("failed to start the network runtime")
        .map_err(BootstrapError::Engine)?;

    let environment = HostEnvironment::synthesize(configuration, Arc::new(TungsteniteConnector));
    let mut engine = V8Engine::new().map_err(BootstrapError::Engine)?;
    run_module(&mut engine, &environment, &module, runtime.handle())
}

/// Bootstrap `module` inside `engine` and run the event loop until idle.
///
/// Must be called outside the tokio runtime `handle` belongs to.
///
/// # Errors
/// Returns the first failure of any stage; see [`BootstrapError`].
pub fn run_module<E: JsEngine + ?Sized>(
    engine: &mut E,
    environment: &HostEnvironment,
    module: &ModuleSource,
    handle: &Handle,
) -> Result<(), BootstrapError> {
    let (context, receiver) = environment.host_context(handle.clone());
    let installed = install_environment(engine, environment, &context)?;
    evaluate(engine, &installed, module)?;
    LifecycleInvoker::new().start(engine)?;

    let mut event_loop = EventLoop::new(&context, receiver);
    event_loop.run(engine).map_err(BootstrapError::Runtime)?;
    debug!("{} tasks dispatched", event_loop.dispatched());
    info!("nothing left to run; exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;
    use crate::test_support::{Call, RecordingEngine};
    use std::io::Write as _;
    use std::path::PathBuf;
    use tokio::runtime::Runtime;

    fn module_file(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn stages_run_in_order() {
        let runtime = Runtime::new().unwrap();
        let file = module_file("function flashproxy_badge_new() {}");
        let module = ModuleSource::read(file.path()).unwrap();
        let environment =
            HostEnvironment::synthesize(&resolve_configuration(None), Arc::new(TungsteniteConnector));
        let mut engine = RecordingEngine::with_factory(FACTORY_SYMBOL);

        run_module(&mut engine, &environment, &module, runtime.handle()).unwrap();

        let first_factory_call = engine
            .calls
            .iter()
            .position(|call| matches!(call, Call::CallGlobal(_)))
            .unwrap();
        let module_eval = engine
            .calls
            .iter()
            .position(|call| matches!(call, Call::Eval(url) if *url == module.url()))
            .unwrap();
        assert!(matches!(engine.calls[0], Call::InstallBindings(_)));
        assert!(module_eval < first_factory_call);
        assert_eq!(engine.count(|call| matches!(call, Call::CallGlobal(_))), 1);
        assert_eq!(engine.count(|call| matches!(call, Call::CallMethod(..))), 1);
    }

    #[test]
    fn load_failure_skips_the_factory() {
        let runtime = Runtime::new().unwrap();
        let file = module_file("this is not javascript");
        let module = ModuleSource::read(file.path()).unwrap();
        let environment =
            HostEnvironment::synthesize(&resolve_configuration(None), Arc::new(TungsteniteConnector));
        let mut engine = RecordingEngine {
            fail_module: Some(String::from("Uncaught SyntaxError: Unexpected identifier 'is'")),
            ..RecordingEngine::with_factory(FACTORY_SYMBOL)
        };

        let error = run_module(&mut engine, &environment, &module, runtime.handle()).unwrap_err();
        assert!(matches!(error, BootstrapError::Load(_)));
        assert_eq!(engine.count(|call| matches!(call, Call::CallGlobal(_))), 0);
    }

    #[test]
    fn missing_module_fails_before_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let missing: PathBuf = dir.path().join("flashproxy.js");
        let settings = HostSettings::new(Some(missing.clone()), 1);

        let error = run(&settings, &resolve_configuration(None)).unwrap_err();
        assert!(matches!(error, BootstrapError::Io { ref path, .. } if *path == missing));
    }
}
