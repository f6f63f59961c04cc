//! Engine double shared by the unit tests.

use crate::environment::HostEnvironment;
use anyhow::{Error, Result, anyhow};
use js::{EngineError, HostBindings, HostContext, HostEvent, JsEngine, ValueHandle};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::UnboundedReceiver;

/// One interaction with the engine.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Call {
    InstallBindings(Vec<String>),
    Eval(String),
    RunJobs,
    CallGlobal(String),
    CallMethod(ValueHandle, String),
}

/// Records every call; scripts are never run.
#[derive(Default)]
pub(crate) struct RecordingEngine {
    pub(crate) calls: Vec<Call>,
    /// Globals `call_global` treats as functions.
    pub(crate) defined: Vec<&'static str>,
    /// Exception text for evaluating any `file:` script.
    pub(crate) fail_module: Option<String>,
    /// Exception text for any method call.
    pub(crate) fail_method: Option<String>,
}

impl RecordingEngine {
    pub(crate) fn with_factory(factory: &'static str) -> Self {
        Self {
            defined: vec![factory],
            ..Self::default()
        }
    }

    pub(crate) fn count(&self, wanted: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|call| wanted(call)).count()
    }
}

impl JsEngine for RecordingEngine {
    fn install_bindings(&mut self, _: &HostContext, bindings: &HostBindings) -> Result<()> {
        self.calls
            .push(Call::InstallBindings(bindings.namespaces.keys().cloned().collect()));
        Ok(())
    }

    fn eval_script(&mut self, _source: &str, url: &str) -> Result<()> {
        self.calls.push(Call::Eval(url.to_owned()));
        match &self.fail_module {
            Some(message) if url.starts_with("file:") => Err(anyhow!("{message}")),
            _ => Ok(()),
        }
    }

    fn run_jobs(&mut self) -> Result<()> {
        self.calls.push(Call::RunJobs);
        Ok(())
    }

    fn call_global(&mut self, name: &str) -> Result<ValueHandle> {
        self.calls.push(Call::CallGlobal(name.to_owned()));
        if self.defined.contains(&name) {
            Ok(ValueHandle(1))
        } else {
            Err(Error::new(EngineError::NotAFunction(name.to_owned())))
        }
    }

    fn call_method(&mut self, target: ValueHandle, method: &str) -> Result<()> {
        self.calls.push(Call::CallMethod(target, method.to_owned()));
        match &self.fail_method {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

pub(crate) fn host_context(
    environment: &HostEnvironment,
    runtime: &Runtime,
) -> (HostContext, UnboundedReceiver<HostEvent>) {
    environment.host_context(runtime.handle().clone())
}
