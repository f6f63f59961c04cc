//! Creating the badge instance and starting it.

use crate::error::BootstrapError;
use js::JsEngine;
use log::{debug, info};

/// Global factory the module must define.
pub const FACTORY_SYMBOL: &str = "flashproxy_badge_new";

/// Method invoked on the factory's result.
pub const START_METHOD: &str = "start";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LifecycleState {
    #[default]
    NotStarted,
    Started,
}

/// Calls the factory and `start()` once per process.
#[derive(Debug, Default)]
pub struct LifecycleInvoker {
    state: LifecycleState,
}

impl LifecycleInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Create the badge instance and start it, then flush microtasks.
    ///
    /// The invoker counts as started as soon as this is entered, so a failed
    /// attempt cannot be retried.
    ///
    /// # Errors
    /// Returns [`BootstrapError::AlreadyStarted`] on a second call without
    /// touching the engine, and [`BootstrapError::Lifecycle`] if the factory is
    /// not a function or either call throws.
    pub fn start<E: JsEngine + ?Sized>(&mut self, engine: &mut E) -> Result<(), BootstrapError> {
        if self.state == LifecycleState::Started {
            return Err(BootstrapError::AlreadyStarted);
        }
        self.state = LifecycleState::Started;

        let instance = engine
            .call_global(FACTORY_SYMBOL)
            .map_err(BootstrapError::Lifecycle)?;
        debug!("{FACTORY_SYMBOL}() returned handle {}", instance.0);
        engine
            .call_method(instance, START_METHOD)
            .map_err(BootstrapError::Lifecycle)?;
        engine.run_jobs().map_err(BootstrapError::Lifecycle)?;
        info!("badge started");
        Ok(())
    }
}
