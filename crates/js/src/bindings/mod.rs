//! Engine-agnostic host bindings facade for registering functions and
//! properties on the JavaScript global object.
//!
//! This module defines a small set of value types and traits that allow the
//! host to install namespaces (for example, `console` or the socket transport
//! behind `WebSocket`) into any JavaScript engine adapter without depending on
//! engine-specific APIs.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

mod values;
pub use values::{JSError, JSValue, LogLevel};
use values::{id_arg, optional_string_arg, string_arg};
mod logger;
pub use logger::HostLogger;
mod net;
pub use net::{HttpRequest, RequestRegistry, perform_request};
mod socket;
pub use socket::{
    ABNORMAL_CLOSURE, SocketCommand, SocketConnector, SocketRegistry, SocketRequest,
    TungsteniteConnector,
};
mod timers;
pub use timers::TimerQueue;
use timers::delay_from_millis;
mod util;

use crate::events::{HostEvent, SocketEvents};

/// Execution context passed to host callbacks.
#[derive(Clone)]
pub struct HostContext {
    /// Logger used by host functions such as `console.*`.
    pub logger: Arc<dyn HostLogger>,
    /// Tokio runtime handle for spawning network tasks.
    pub tokio_handle: Handle,
    /// Completions posted by network tasks, drained by the event loop.
    pub events: UnboundedSender<HostEvent>,
    /// Pending `setTimeout` / `setInterval` deadlines.
    pub timers: Arc<Mutex<TimerQueue>>,
    /// Open sockets created through the `WebSocket` constructor.
    pub sockets: Arc<Mutex<SocketRegistry>>,
    /// In-flight `XMLHttpRequest`s.
    pub requests: Arc<Mutex<RequestRegistry>>,
    /// Transport used for new sockets.
    pub connector: Arc<dyn SocketConnector>,
    /// Shared HTTP client for `XMLHttpRequest`.
    pub http_client: reqwest::Client,
    /// Time origin for `performance.now` and timer scheduling.
    pub performance_start: Instant,
}

impl HostContext {
    /// Build a context and the receiver the event loop drains.
    pub fn new(
        logger: Arc<dyn HostLogger>,
        tokio_handle: Handle,
        connector: Arc<dyn SocketConnector>,
    ) -> (Self, UnboundedReceiver<HostEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let context = Self {
            logger,
            tokio_handle,
            events,
            timers: Arc::new(Mutex::new(TimerQueue::new())),
            sockets: Arc::new(Mutex::new(SocketRegistry::default())),
            requests: Arc::new(Mutex::new(RequestRegistry::default())),
            connector,
            http_client: reqwest::Client::new(),
            performance_start: Instant::now(),
        };
        (context, receiver)
    }
}

/// Lock a shared registry, mapping poisoning to a script-visible internal error.
pub(crate) fn lock<'guard, T>(mutex: &'guard Mutex<T>, what: &str) -> Result<MutexGuard<'guard, T>, JSError> {
    mutex
        .lock()
        .map_err(|_| JSError::InternalError(format!("{what} mutex poisoned")))
}

/// A synchronous host function signature.
pub type HostFnSync =
    dyn Fn(&HostContext, Vec<JSValue>) -> Result<JSValue, JSError> + Send + Sync + 'static;

/// A single function descriptor the engine adapter can install.
#[derive(Clone)]
pub enum HostFnKind {
    /// Synchronous function.
    Sync(Arc<HostFnSync>),
}

/// A namespaced set of functions and properties (for example, the `console` object).
pub struct HostNamespace {
    /// Functions to install under this namespace.
    pub functions: BTreeMap<String, HostFnKind>,
    /// Constant properties to install under this namespace.
    pub properties: BTreeMap<String, JSValue>,
}

impl HostNamespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self {
            functions: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Register a synchronous function.
    pub fn with_sync_fn(mut self, name: &str, function: Arc<HostFnSync>) -> Self {
        self.functions
            .insert(name.to_owned(), HostFnKind::Sync(function));
        self
    }

    /// Register a constant property.
    pub fn with_property(mut self, name: &str, value: JSValue) -> Self {
        self.properties.insert(name.to_owned(), value);
        self
    }
}

impl Default for HostNamespace {
    fn default() -> Self {
        Self::new()
    }
}

/// A collection of namespaces to be installed on the global object.
pub struct HostBindings {
    /// Mapping from namespace name to its definitions.
    pub namespaces: BTreeMap<String, HostNamespace>,
}

impl HostBindings {
    /// Create empty bindings.
    pub fn new() -> Self {
        Self {
            namespaces: BTreeMap::new(),
        }
    }

    /// Add or replace a namespace.
    pub fn with_namespace(mut self, name: &str, namespace: HostNamespace) -> Self {
        self.namespaces.insert(name.to_owned(), namespace);
        self
    }

    /// Merge every namespace of `other` into `self`, replacing same-named ones.
    pub fn merge(mut self, other: Self) -> Self {
        self.namespaces.extend(other.namespaces);
        self
    }
}

impl Default for HostBindings {
    fn default() -> Self {
        Self::new()
    }
}

/// Internal helper to build a console logging function for a given level.
fn make_log_fn(level: LogLevel) -> Arc<HostFnSync> {
    Arc::new(
        move |context: &HostContext, arguments: Vec<JSValue>| -> Result<JSValue, JSError> {
            let message = stringify_arguments(arguments);
            context.logger.log(level, &message);
            Ok(JSValue::Undefined)
        },
    )
}

/// Build the `console` namespace with standard logging methods.
pub fn build_console_namespace() -> HostNamespace {
    let methods: [(&str, LogLevel); 5] = [
        ("debug", LogLevel::Debug),
        ("log", LogLevel::Info),
        ("info", LogLevel::Info),
        ("warn", LogLevel::Warn),
        ("error", LogLevel::Error),
    ];

    methods
        .iter()
        .fold(HostNamespace::new(), |ns, (name, level)| {
            ns.with_sync_fn(name, make_log_fn(*level))
        })
}

/// Build the `performance` namespace with a high-resolution now() function.
pub fn build_performance_namespace() -> HostNamespace {
    let now_fn = Arc::new(
        move |context: &HostContext, _args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let elapsed = Instant::now().duration_since(context.performance_start);
            Ok(JSValue::Number(elapsed.as_secs_f64() * 1000.0))
        },
    );
    HostNamespace::new().with_sync_fn("now", now_fn)
}

/// Build the `__badgeTimers` namespace used by the prelude's timer functions.
/// Functions:
/// - schedule(id: number, delayMs: number) -> undefined
/// - cancel(id: number) -> undefined
pub fn build_timers_namespace() -> HostNamespace {
    let schedule = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let id = id_arg(&args, 0, "id")?;
            let delay = delay_from_millis(args.get(1).and_then(JSValue::as_f64).unwrap_or(0.0));
            lock(&context.timers, "timer queue")?.schedule(id, delay, Instant::now());
            Ok(JSValue::Undefined)
        },
    );
    let cancel = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let id = id_arg(&args, 0, "id")?;
            lock(&context.timers, "timer queue")?.cancel(id);
            Ok(JSValue::Undefined)
        },
    );
    HostNamespace::new()
        .with_sync_fn("schedule", schedule)
        .with_sync_fn("cancel", cancel)
}

/// Validate a WebSocket URL the way the `WebSocket` constructor does.
fn parse_socket_url(raw: &str) -> Result<Url, JSError> {
    let parsed = Url::parse(raw)
        .map_err(|_| JSError::SyntaxError(format!("The URL '{raw}' is invalid.")))?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(JSError::SyntaxError(format!(
            "The URL's scheme must be either 'ws' or 'wss'. '{}' is not allowed.",
            parsed.scheme()
        )));
    }
    if parsed.fragment().is_some() {
        return Err(JSError::SyntaxError(format!(
            "The URL contains a fragment identifier ('{}'). Fragment identifiers are not allowed in WebSocket URLs.",
            parsed.fragment().unwrap_or_default()
        )));
    }
    Ok(parsed)
}

/// Build the `__badgeSocket` namespace backing the prelude's `WebSocket` class.
/// Functions:
/// - open(url: string, protocolsJson?: string) -> number (socket id)
/// - send(id: number, text: string) -> boolean (false once the socket is gone)
/// - sendBinary(id: number, bytesJson: string) -> boolean
/// - close(id: number, code?: number, reason?: string) -> undefined
pub fn build_socket_namespace() -> HostNamespace {
    let open = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let url = parse_socket_url(&string_arg(&args, 0, "url")?)?;
            let protocols: Vec<String> = match optional_string_arg(&args, 1) {
                Some(json) => serde_json::from_str(&json).map_err(|_| {
                    JSError::TypeError(String::from("protocols must be a list of strings"))
                })?,
                None => Vec::new(),
            };
            let (commands, command_receiver) = mpsc::unbounded_channel();
            let id = lock(&context.sockets, "socket registry")?.register(commands);
            let request = SocketRequest {
                url: url.to_string(),
                protocols,
            };
            let connection = context.connector.connect(
                request,
                command_receiver,
                SocketEvents::new(id, context.events.clone()),
            );
            context.tokio_handle.spawn(connection);
            Ok(JSValue::Number(id as f64))
        },
    );

    let send = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let id = id_arg(&args, 0, "id")?;
            let text = string_arg(&args, 1, "data")?;
            let sent = lock(&context.sockets, "socket registry")?
                .command(id, SocketCommand::SendText(text));
            Ok(JSValue::Boolean(sent))
        },
    );

    let send_binary = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let id = id_arg(&args, 0, "id")?;
            let bytes: Vec<u8> = serde_json::from_str(&string_arg(&args, 1, "data")?)
                .map_err(|_| JSError::TypeError(String::from("data must be a byte array")))?;
            let sent = lock(&context.sockets, "socket registry")?
                .command(id, SocketCommand::SendBinary(bytes));
            Ok(JSValue::Boolean(sent))
        },
    );

    let close = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let id = id_arg(&args, 0, "id")?;
            let code = match args.get(1).and_then(JSValue::as_f64) {
                Some(number) => {
                    let code = number.clamp(0.0, f64::from(u16::MAX)) as u16;
                    if code != 1000 && !(3000..=4999).contains(&code) {
                        return Err(JSError::InvalidAccess(format!(
                            "The code must be either 1000, or between 3000 and 4999. {code} is neither."
                        )));
                    }
                    code
                }
                None => 1000,
            };
            let reason = optional_string_arg(&args, 2).unwrap_or_default();
            if reason.len() > 123 {
                return Err(JSError::SyntaxError(String::from(
                    "The close reason must not be greater than 123 UTF-8 bytes.",
                )));
            }
            // Closing an already finished socket is a no-op.
            let _delivered: bool = lock(&context.sockets, "socket registry")?
                .command(id, SocketCommand::Close { code, reason });
            Ok(JSValue::Undefined)
        },
    );

    HostNamespace::new()
        .with_sync_fn("open", open)
        .with_sync_fn("send", send)
        .with_sync_fn("sendBinary", send_binary)
        .with_sync_fn("close", close)
}

/// Build the `__badgeNet` namespace backing the prelude's `XMLHttpRequest` class.
/// Functions:
/// - request(method: string, url: string, headersJson?: string, body?: string) -> number (request id)
/// - abort(id: number) -> undefined
pub fn build_net_namespace() -> HostNamespace {
    let request = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let method = string_arg(&args, 0, "method")?;
            let raw_url = string_arg(&args, 1, "url")?;
            let url = Url::parse(&raw_url)
                .map_err(|_| JSError::SyntaxError(format!("invalid URL: {raw_url}")))?;
            let id = lock(&context.requests, "request registry")?.allocate_id();
            let http_request = HttpRequest {
                id,
                method,
                url: url.to_string(),
                headers_json: optional_string_arg(&args, 2),
                body: optional_string_arg(&args, 3),
            };
            let client = context.http_client.clone();
            let events = context.events.clone();
            let task = context.tokio_handle.spawn(async move {
                let done = perform_request(client, http_request).await;
                if events.send(done).is_err() {
                    log::debug!("request {id}: completion dropped after loop shutdown");
                }
            });
            lock(&context.requests, "request registry")?.attach(id, task.abort_handle());
            Ok(JSValue::Number(id as f64))
        },
    );

    let abort = Arc::new(
        move |context: &HostContext, args: Vec<JSValue>| -> Result<JSValue, JSError> {
            let id = id_arg(&args, 0, "id")?;
            lock(&context.requests, "request registry")?.abort(id);
            Ok(JSValue::Undefined)
        },
    );

    HostNamespace::new()
        .with_sync_fn("request", request)
        .with_sync_fn("abort", abort)
}

/// Build the default set of host bindings every badge host installs:
/// `console`, `performance`, and the namespaces behind timers, `WebSocket` and `XMLHttpRequest`.
pub fn build_default_bindings() -> HostBindings {
    HostBindings::new()
        .with_namespace("console", build_console_namespace())
        .with_namespace("performance", build_performance_namespace())
        .with_namespace("__badgeTimers", build_timers_namespace())
        .with_namespace("__badgeSocket", build_socket_namespace())
        .with_namespace("__badgeNet", build_net_namespace())
}

/// Convert a vector of JSValue to a space-separated string.
pub fn stringify_arguments(arguments: Vec<JSValue>) -> String {
    arguments
        .into_iter()
        .map(|value| match value {
            JSValue::Undefined => String::from("undefined"),
            JSValue::Null => String::from("null"),
            JSValue::Boolean(value) => value.to_string(),
            JSValue::Number(value) => value.to_string(),
            JSValue::String(value) => value,
        })
        .collect::<Vec<_>>()
        .join(" ")
}
