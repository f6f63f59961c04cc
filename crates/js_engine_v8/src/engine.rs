//! V8 JavaScript engine implementation.

use crate::bindings::install_bindings_impl;
use crate::conversions::build_onerror_script;
use anyhow::{Error, Result, anyhow};
use core::pin::Pin;
use js::runtime::{RUNTIME_PRELUDE, RUNTIME_PRELUDE_URL};
use js::{Console, EngineError, HostBindings, HostContext, JsEngine, ValueHandle};
use log::trace;
use std::collections::HashMap;
use std::sync::Once;
use v8::{
    Context, ContextScope, CreateParams, Function, Global, Isolate, Local, OwnedIsolate, Script,
    ScriptOrigin, String as V8String, V8, Value, new_default_platform,
};

/// Turn the exception caught by `$tc` into an error, reporting it on the
/// console and to `window.onerror` first.
///
/// The error text is V8's message for the exception, passed through unchanged.
macro_rules! uncaught_error {
    ($tc:ident, $url:expr) => {{
        if $tc.has_caught() {
            let exc_str = $tc.exception().and_then(|val| val.to_string($tc)).map_or_else(
                || "Uncaught exception".to_owned(),
                |val| val.to_rust_string_lossy($tc),
            );
            let stack = $tc
                .stack_trace()
                .and_then(|val| val.to_string($tc))
                .map(|val| val.to_rust_string_lossy($tc));
            let message = $tc.message().map_or_else(
                || exc_str.clone(),
                |msg_obj| msg_obj.get($tc).to_rust_string_lossy($tc),
            );
            Console::exception(message.clone(), stack.as_deref());
            let call_onerror = build_onerror_script(&message, $url);
            if let Some(onerror_code) = V8String::new($tc, &call_onerror)
                && let Some(compiled) = Script::compile($tc, onerror_code, None)
                && compiled.run($tc).is_none()
            {
                Console::info("window.onerror dispatch failed");
            }
            anyhow!(message)
        } else {
            anyhow!("script execution terminated")
        }
    }};
}

/// Script values retained across calls, addressed by [`ValueHandle`].
#[derive(Default)]
struct HandleTable {
    next_id: u64,
    values: HashMap<u64, Global<Value>>,
}

impl HandleTable {
    fn retain(&mut self, value: Global<Value>) -> ValueHandle {
        self.next_id = self.next_id.saturating_add(1);
        self.values.insert(self.next_id, value);
        ValueHandle(self.next_id)
    }
}

/// V8-backed engine with a single context.
pub struct V8Engine {
    /// The current global V8 context.
    context: Global<Context>,
    /// Values returned by `call_global`.
    handles: HandleTable,
    /// Whether the runtime prelude has been evaluated in the context.
    stubs_installed: bool,
    /// The owned isolate (Pin<Box> ensures it doesn't move in memory).
    /// Declared last so the globals above are released while it is alive.
    isolate: Pin<Box<OwnedIsolate>>,
}

impl V8Engine {
    /// Create a new engine instance: initializes the V8 platform, isolate, and context.
    ///
    /// # Errors
    /// Returns an error if context initialization fails (unexpected).
    #[inline]
    pub fn new() -> Result<Self> {
        // Initialize V8 platform (singleton per-process).
        static START: Once = Once::new();
        START.call_once(|| {
            let platform = new_default_platform(0, false).make_shared();
            V8::initialize_platform(platform);
            V8::initialize();
        });

        // Global<Context> stores a raw pointer to the isolate, so it must not move.
        let mut isolate = Box::pin(Isolate::new(CreateParams::default()));
        let context = {
            // SAFETY: the isolate is pinned and never moved out of the box
            let isolate_mut = unsafe { isolate.as_mut().get_unchecked_mut() };
            v8::scope!(let scope, isolate_mut);
            let ctx: Local<Context> = Context::new(scope, Default::default());
            Global::new(scope, ctx)
        };
        Console::debug("V8Engine initialized");
        Ok(Self {
            context,
            handles: HandleTable::default(),
            stubs_installed: false,
            isolate,
        })
    }

    /// Run `body` with this engine's isolate entered.
    ///
    /// Another engine may have entered its own isolate since this one was
    /// created, so every operation re-enters.
    fn with_isolate<R>(
        &mut self,
        body: impl FnOnce(&mut Isolate, &Global<Context>, &mut HandleTable) -> R,
    ) -> R {
        // SAFETY: the isolate is pinned and never moved out of the box
        let isolate_mut = unsafe { self.isolate.as_mut().get_unchecked_mut() };
        // SAFETY: paired with the exit below on the same thread
        unsafe { isolate_mut.enter() };

        let result = body(isolate_mut, &self.context, &mut self.handles);

        // SAFETY: the isolate was entered above
        unsafe { isolate_mut.exit() };

        result
    }

    fn run_script_impl(
        isolate_mut: &mut Isolate,
        context: &Global<Context>,
        source: &str,
        url: &str,
    ) -> Result<()> {
        v8::scope!(let scope, isolate_mut);

        let local_context: Local<Context> = Local::new(scope, context);
        let scope = &mut ContextScope::new(scope, local_context);

        v8::tc_scope!(let tc, scope);

        let code = V8String::new(tc, source).ok_or_else(|| anyhow!("alloc v8 string"))?;
        let name = V8String::new(tc, url).ok_or_else(|| anyhow!("alloc v8 name"))?;
        let origin = ScriptOrigin::new(
            tc,
            name.into(),
            0,
            0,
            false,
            0,
            None,
            false,
            false,
            false,
            None,
        );
        let completed = Script::compile(tc, code, Some(&origin))
            .and_then(|compiled| compiled.run(tc))
            .is_some();
        if completed {
            return Ok(());
        }
        Err(uncaught_error!(tc, url))
    }

    fn call_global_impl(
        isolate_mut: &mut Isolate,
        context: &Global<Context>,
        handles: &mut HandleTable,
        name: &str,
    ) -> Result<ValueHandle> {
        v8::scope!(let scope, isolate_mut);

        let local_context: Local<Context> = Local::new(scope, context);
        let scope = &mut ContextScope::new(scope, local_context);
        let global = local_context.global(scope);

        v8::tc_scope!(let tc, scope);

        let key = V8String::new(tc, name).ok_or_else(|| anyhow!("alloc v8 name"))?;
        let function = global
            .get(tc, key.into())
            .and_then(|value| Local::<Function>::try_from(value).ok())
            .ok_or_else(|| Error::new(EngineError::NotAFunction(name.to_owned())))?;
        let Some(result) = function.call(tc, global.into(), &[]) else {
            return Err(uncaught_error!(tc, name));
        };
        let retained = Global::new(tc, result);
        let handle = handles.retain(retained);
        trace!("retained result of {name}() as handle {}", handle.0);
        Ok(handle)
    }

    fn call_method_impl(
        isolate_mut: &mut Isolate,
        context: &Global<Context>,
        handles: &HandleTable,
        target: ValueHandle,
        method: &str,
    ) -> Result<()> {
        let stored = handles
            .values
            .get(&target.0)
            .ok_or_else(|| Error::new(EngineError::UnknownHandle(target)))?;

        v8::scope!(let scope, isolate_mut);

        let local_context: Local<Context> = Local::new(scope, context);
        let scope = &mut ContextScope::new(scope, local_context);

        v8::tc_scope!(let tc, scope);

        let receiver: Local<Value> = Local::new(tc, stored);
        let not_a_function = || Error::new(EngineError::NotAFunction(method.to_owned()));
        let object = receiver.to_object(tc).ok_or_else(not_a_function)?;
        let key = V8String::new(tc, method).ok_or_else(|| anyhow!("alloc v8 name"))?;
        let function = object
            .get(tc, key.into())
            .and_then(|value| Local::<Function>::try_from(value).ok())
            .ok_or_else(not_a_function)?;
        if function.call(tc, receiver, &[]).is_some() {
            return Ok(());
        }
        Err(uncaught_error!(tc, method))
    }

    fn run_jobs_impl(isolate_mut: &mut Isolate, context: &Global<Context>) {
        v8::scope!(let scope, isolate_mut);

        let local_context: Local<Context> = Local::new(scope, context);
        let scope = &mut ContextScope::new(scope, local_context);

        v8::tc_scope!(let tc, scope);

        tc.perform_microtask_checkpoint();
    }

    /// Evaluate the runtime prelude once per context.
    ///
    /// # Errors
    /// Returns an error if executing the runtime prelude fails.
    fn ensure_stubs(&mut self) -> Result<()> {
        if self.stubs_installed {
            return Ok(());
        }
        self.with_isolate(|isolate_mut, context, _| {
            Self::run_script_impl(isolate_mut, context, RUNTIME_PRELUDE, RUNTIME_PRELUDE_URL)
        })?;
        self.stubs_installed = true;
        Ok(())
    }
}

impl JsEngine for V8Engine {
    #[inline]
    fn install_bindings(&mut self, host_context: &HostContext, bindings: &HostBindings) -> Result<()> {
        self.with_isolate(|isolate_mut, context, _| {
            install_bindings_impl(isolate_mut, context, host_context, bindings)
        })
    }

    #[inline]
    fn eval_script(&mut self, source: &str, url: &str) -> Result<()> {
        self.ensure_stubs()?;
        self.with_isolate(|isolate_mut, context, _| {
            Self::run_script_impl(isolate_mut, context, source, url)
        })
    }

    #[inline]
    fn run_jobs(&mut self) -> Result<()> {
        self.with_isolate(|isolate_mut, context, _| Self::run_jobs_impl(isolate_mut, context));
        Ok(())
    }

    #[inline]
    fn call_global(&mut self, name: &str) -> Result<ValueHandle> {
        self.ensure_stubs()?;
        self.with_isolate(|isolate_mut, context, handles| {
            Self::call_global_impl(isolate_mut, context, handles, name)
        })
    }

    #[inline]
    fn call_method(&mut self, target: ValueHandle, method: &str) -> Result<()> {
        self.with_isolate(|isolate_mut, context, handles| {
            Self::call_method_impl(isolate_mut, context, handles, target, method)
        })
    }
}
