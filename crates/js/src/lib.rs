//! Engine-agnostic JavaScript facade for hosting browser-authored scripts.
//! This crate centralizes the interfaces shared by engine adapters and the
//! badge host: host bindings, the runtime prelude, I/O completion events and
//! the event loop that feeds them back into the engine.

use anyhow::Result;
use core::fmt::{Display, Formatter, Result as FmtResult};
use std::error::Error;

pub mod console;
pub use console::{Console, ConsoleLogger};

/// Engine-agnostic host bindings facade: values, logger, and namespace builders.
pub mod bindings;
pub use bindings::{
    HostBindings, HostContext, HostFnKind, HostFnSync, HostLogger, HostNamespace, JSError,
    JSValue, LogLevel, SocketCommand, SocketConnector, SocketRequest, TungsteniteConnector,
    build_console_namespace, build_default_bindings, build_net_namespace,
    build_performance_namespace, build_socket_namespace, build_timers_namespace,
    stringify_arguments,
};

pub mod event_loop;
pub use event_loop::EventLoop;
pub mod events;
pub use events::{HostEvent, MessageData, SocketEvents};

/// JavaScript prelude script for bootstrapping runtime behavior in the engine.
pub mod runtime;

// ============================
// Engine-agnostic JS context trait
// ============================

/// Opaque reference to a script value retained by the engine across calls.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ValueHandle(pub u64);

/// A minimal interface for evaluating JavaScript in a single global scope.
/// Keep this trait small so engines can be swapped.
pub trait JsEngine {
    /// Install host namespaces and properties onto the global object.
    ///
    /// # Errors
    /// Returns an error if the engine cannot allocate the bindings.
    fn install_bindings(&mut self, host_context: &HostContext, bindings: &HostBindings) -> Result<()>;
    /// Evaluate a classic script in the global scope.
    /// Engines run the runtime prelude once before the first script.
    ///
    /// # Errors
    /// Returns the engine's exception text if compilation or execution fails.
    fn eval_script(&mut self, source: &str, url: &str) -> Result<()>;
    /// Run pending microtasks/jobs until idle.
    ///
    /// # Errors
    /// Returns an error if the engine fails to drain its job queue.
    fn run_jobs(&mut self) -> Result<()>;
    /// Call the global function `name` with no arguments and retain its result.
    ///
    /// # Errors
    /// Returns [`EngineError::NotAFunction`] if the global is missing or not
    /// callable, or the exception text if the call throws.
    fn call_global(&mut self, name: &str) -> Result<ValueHandle>;
    /// Call `target.method()` with no arguments.
    ///
    /// # Errors
    /// Returns [`EngineError::NotAFunction`] if the method is missing,
    /// [`EngineError::UnknownHandle`] for a stale handle, or the exception text if the call throws.
    fn call_method(&mut self, target: ValueHandle, method: &str) -> Result<()>;
}

/// Engine failures the host needs to tell apart from script exceptions.
#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    /// The named binding is absent or not callable.
    NotAFunction(String),
    /// The handle does not refer to a retained value.
    UnknownHandle(ValueHandle),
}

impl Display for EngineError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NotAFunction(name) => write!(formatter, "{name} is not a function"),
            Self::UnknownHandle(handle) => write!(formatter, "unknown value handle {}", handle.0),
        }
    }
}

impl Error for EngineError {}
