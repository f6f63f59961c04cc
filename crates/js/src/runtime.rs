//! Engine-agnostic JavaScript runtime prelude.
//!
//! This module exports the JavaScript that turns the host namespaces into the
//! browser globals a page script expects: `window`, timers, `WebSocket` and
//! `XMLHttpRequest`, plus the `__badgeHost` hooks the event loop calls.

/// JavaScript source for the runtime prelude.
///
/// Engines should evaluate this once per context before running any other script.
/// It only touches host namespaces lazily, so it may run before or after
/// `install_bindings`.
pub const RUNTIME_PRELUDE: &str = include_str!("runtime_prelude.js");

/// URL the prelude is evaluated under, visible in stack traces.
pub const RUNTIME_PRELUDE_URL: &str = "badge://runtime_prelude";

/// Script run by the event loop to fire timer `id`.
pub fn fire_timer_script(id: u64) -> String {
    format!("__badgeHost.fireTimer({id});")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_defines_browser_globals() {
        for name in [
            "globalThis.window = globalThis",
            "globalThis.setTimeout",
            "globalThis.setInterval",
            "globalThis.clearTimeout",
            "globalThis.clearInterval",
            "globalThis.WebSocket",
            "globalThis.XMLHttpRequest",
            "globalThis.__badgeHost",
        ] {
            assert!(RUNTIME_PRELUDE.contains(name), "prelude is missing {name}");
        }
    }

    #[test]
    fn timer_script_targets_dispatcher() {
        assert_eq!(fire_timer_script(12), "__badgeHost.fireTimer(12);");
    }
}
