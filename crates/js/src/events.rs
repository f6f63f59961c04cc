//! Completion records posted by host I/O tasks and replayed into the engine.
//!
//! I/O runs on tokio worker threads that never touch the engine. Each task
//! reports progress by sending a [`HostEvent`] over the host channel; the
//! [`EventLoop`](crate::EventLoop) serializes it to JSON and hands it to the
//! prelude's `__badgeHost.dispatch` on the engine thread.

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Payload of a received WebSocket message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageData {
    /// A text frame.
    Text(String),
    /// A binary frame, delivered to scripts as a byte array.
    Binary(Vec<u8>),
}

/// An I/O completion destined for script callbacks.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    /// The WebSocket handshake finished.
    SocketOpen { id: u64, protocol: String },
    /// A data frame arrived.
    SocketMessage { id: u64, data: MessageData },
    /// The connection failed; always followed by `SocketClose`.
    SocketError { id: u64, message: String },
    /// The connection is gone. Terminal for the socket id.
    SocketClose {
        id: u64,
        code: u16,
        reason: String,
        was_clean: bool,
    },
    /// An HTTP request finished (successfully or not). Terminal for the request id.
    RequestDone {
        id: u64,
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
        body: String,
        url: String,
        error: Option<String>,
    },
}

impl HostEvent {
    /// Build the script that delivers this event to the prelude dispatcher.
    ///
    /// # Errors
    /// Returns an error if the event cannot be serialized.
    pub fn dispatch_script(&self) -> Result<String> {
        let json = serde_json::to_string(self)?;
        Ok(format!("__badgeHost.dispatch({json});"))
    }
}

/// Sender half used by I/O tasks to report events for a single socket id.
#[derive(Clone, Debug)]
pub struct SocketEvents {
    id: u64,
    sender: UnboundedSender<HostEvent>,
}

impl SocketEvents {
    /// Bind an event sender to a socket id.
    pub fn new(id: u64, sender: UnboundedSender<HostEvent>) -> Self {
        Self { id, sender }
    }

    /// The socket id these events are reported for.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Report a completed handshake.
    pub fn open(&self, protocol: String) {
        self.post(HostEvent::SocketOpen {
            id: self.id,
            protocol,
        });
    }

    /// Report an incoming frame.
    pub fn message(&self, data: MessageData) {
        self.post(HostEvent::SocketMessage { id: self.id, data });
    }

    /// Report a connection failure.
    pub fn error(&self, message: String) {
        self.post(HostEvent::SocketError {
            id: self.id,
            message,
        });
    }

    /// Report the end of the connection.
    pub fn close(&self, code: u16, reason: String, was_clean: bool) {
        self.post(HostEvent::SocketClose {
            id: self.id,
            code,
            reason,
            was_clean,
        });
    }

    fn post(&self, event: HostEvent) {
        // The receiver only goes away when the event loop has already finished.
        if self.sender.send(event).is_err() {
            log::debug!("socket {}: event dropped after loop shutdown", self.id);
        }
    }
}
