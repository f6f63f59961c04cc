//! The browser surface the badge module reads.

use crate::config::ConfigurationString;
use js::{
    ConsoleLogger, HostBindings, HostContext, HostEvent, HostNamespace, JSValue, SocketConnector,
    build_default_bindings,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

/// `navigator.userAgent` seen by the module.
pub const USER_AGENT: &str = "Chrome/16";

/// Document address the badge pretends to be loaded from.
pub const LOCATION_BASE: &str = "about:badge";

/// Capabilities handed to the module. Built once before loading and never
/// changed afterwards.
pub struct HostEnvironment {
    location_search: String,
    location_href: String,
    connector: Arc<dyn SocketConnector>,
}

impl HostEnvironment {
    /// Derive the environment from `configuration`, with `connector` backing
    /// the `WebSocket` constructor.
    pub fn synthesize(
        configuration: &ConfigurationString,
        connector: Arc<dyn SocketConnector>,
    ) -> Self {
        let location_search = configuration.location_search();
        let location_href = format!("{LOCATION_BASE}{location_search}");
        Self {
            location_search,
            location_href,
            connector,
        }
    }

    pub fn location_search(&self) -> &str {
        &self.location_search
    }

    pub fn location_href(&self) -> &str {
        &self.location_href
    }

    pub fn user_agent(&self) -> &'static str {
        USER_AGENT
    }

    /// Host namespaces to install: `location`, `navigator` and the defaults
    /// the runtime prelude builds on.
    pub fn bindings(&self) -> HostBindings {
        let location = HostNamespace::new()
            .with_property("search", JSValue::String(self.location_search.clone()))
            .with_property("href", JSValue::String(self.location_href.clone()));
        let navigator = HostNamespace::new()
            .with_property("userAgent", JSValue::String(String::from(USER_AGENT)));
        build_default_bindings()
            .with_namespace("location", location)
            .with_namespace("navigator", navigator)
    }

    /// Context for host callbacks, with this environment's socket connector,
    /// plus the receiver the event loop drains.
    pub fn host_context(&self, handle: Handle) -> (HostContext, UnboundedReceiver<HostEvent>) {
        HostContext::new(Arc::new(ConsoleLogger), handle, Arc::clone(&self.connector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::resolve_configuration;
    use js::TungsteniteConnector;

    fn property<'env>(bindings: &'env HostBindings, namespace: &str, name: &str) -> Option<&'env str> {
        bindings.namespaces.get(namespace)?.properties.get(name)?.as_str()
    }

    #[test]
    fn search_carries_configuration_verbatim() {
        let configuration = resolve_configuration(Some(String::from("debug=0")));
        let environment = HostEnvironment::synthesize(&configuration, Arc::new(TungsteniteConnector));
        assert_eq!(environment.location_search(), "?debug=0");
        assert_eq!(environment.location_href(), "about:badge?debug=0");
        assert_eq!(environment.user_agent(), "Chrome/16");
    }

    #[test]
    fn bindings_expose_location_and_navigator() {
        let environment =
            HostEnvironment::synthesize(&resolve_configuration(None), Arc::new(TungsteniteConnector));
        let bindings = environment.bindings();
        assert_eq!(
            property(&bindings, "location", "search"),
            Some("?debug=1&initial_facilitator_poll_interval=10")
        );
        assert_eq!(property(&bindings, "navigator", "userAgent"), Some(USER_AGENT));
        for namespace in ["console", "performance", "__badgeTimers", "__badgeSocket", "__badgeNet"] {
            assert!(bindings.namespaces.contains_key(namespace), "missing {namespace}");
        }
    }
}
