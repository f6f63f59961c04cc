//! Host function bindings and installation.

use crate::conversions::{collect_js_args, host_error_to_exception, jsvalue_to_local};
use anyhow::{Result, anyhow};
use core::ffi::c_void;
use js::{HostBindings, HostContext, HostFnKind, HostNamespace};
use v8::{
    Context, ContextScope, External, Function, FunctionCallbackArguments, Global, Isolate, Local,
    Object, ReturnValue, String as V8String,
};

/// Dispatcher for host-bound functions installed through `HostBindings`.
pub(crate) fn host_fn_dispatch<'s, 'i>(
    scope: &mut v8::PinScope<'s, 'i>,
    args: FunctionCallbackArguments,
    mut ret_val: ReturnValue,
) {
    let data_value = args.data();
    let Ok(external_value) = Local::<External>::try_from(data_value) else {
        let undef = v8::undefined(scope);
        ret_val.set(undef.into());
        return;
    };
    let collected = collect_js_args(scope, &args);
    let ptr = external_value.value();
    if ptr.is_null() {
        let undef = v8::undefined(scope);
        ret_val.set(undef.into());
        return;
    }
    // SAFETY: pointer refers to a Box<(HostContext, HostFnKind)> leaked in make_v8_callback
    let payload: &(HostContext, HostFnKind) = unsafe { &*ptr.cast::<(HostContext, HostFnKind)>() };
    let host_context: &HostContext = &payload.0;

    let HostFnKind::Sync(function_arc) = &payload.1;
    match (**function_arc)(host_context, collected) {
        Ok(result) => ret_val.set(jsvalue_to_local(scope, result)),
        Err(error) => {
            if let Some(exception) = host_error_to_exception(scope, &error) {
                scope.throw_exception(exception);
            } else {
                let undef = v8::undefined(scope);
                ret_val.set(undef.into());
            }
        }
    }
}

/// Wrap a `HostFnKind` as a V8 `Function`.
///
/// Returns `None` if allocation fails.
pub(crate) fn make_v8_callback<'s, 'i>(
    scope: &mut v8::PinScope<'s, 'i>,
    host_context: &HostContext,
    host_fn: HostFnKind,
) -> Option<Local<'s, Function>> {
    // Leaked: V8 has no finalizer hook here, and the function lives as long as the context.
    let payload = Box::new((host_context.clone(), host_fn));
    let ptr = Box::into_raw(payload).cast::<c_void>();
    let external = External::new(scope, ptr);
    Function::builder(host_fn_dispatch)
        .data(external.into())
        .build(scope)
}

/// Install host bindings (namespaces and functions) onto the global object.
///
/// Namespaces that already exist on the global are extended rather than replaced.
///
/// # Errors
/// Returns an error if V8 string allocation fails for a namespace name.
pub(crate) fn install_bindings_impl(
    isolate_mut: &mut Isolate,
    context: &Global<Context>,
    host_context: &HostContext,
    bindings: &HostBindings,
) -> Result<()> {
    v8::scope!(let scope, isolate_mut);

    let local_context: Local<Context> = Local::new(scope, context);
    let scope = &mut ContextScope::new(scope, local_context);
    let global = local_context.global(scope);

    for (namespace_name, namespace) in &bindings.namespaces {
        let ns_key = V8String::new(scope, namespace_name)
            .ok_or_else(|| anyhow!("failed to allocate V8 string for namespace {namespace_name}"))?;
        let existing = global.get(scope, ns_key.into());
        let target_obj: Local<Object> = existing
            .and_then(|value| Local::<Object>::try_from(value).ok())
            .unwrap_or_else(|| {
                let obj = Object::new(scope);
                let _set_ns: Option<bool> = global.set(scope, ns_key.into(), obj.into());
                obj
            });

        install_namespace_properties(scope, namespace, target_obj);
        install_namespace_functions(scope, host_context, namespace, target_obj);
    }
    Ok(())
}

/// Install constant properties for a single host namespace onto the target object.
#[inline]
fn install_namespace_properties<'s, 'i>(
    scope: &mut v8::PinScope<'s, 'i>,
    namespace: &HostNamespace,
    target_obj: Local<Object>,
) {
    for (property_name, property_value) in &namespace.properties {
        let Some(key) = V8String::new(scope, property_name) else {
            continue;
        };
        let value = jsvalue_to_local(scope, property_value.clone());
        let _set_prop: Option<bool> = target_obj.set(scope, key.into(), value);
    }
}

/// Install functions for a single host namespace onto the target object.
#[inline]
fn install_namespace_functions<'s, 'i>(
    scope: &mut v8::PinScope<'s, 'i>,
    host_context: &HostContext,
    namespace: &HostNamespace,
    target_obj: Local<Object>,
) {
    for (function_name, function_kind) in &namespace.functions {
        let Some(function) = make_v8_callback(scope, host_context, function_kind.clone()) else {
            continue;
        };
        let Some(key) = V8String::new(scope, function_name) else {
            continue;
        };
        let _set_fn: Option<bool> = target_obj.set(scope, key.into(), function.into());
    }
}
