//! Host networking behind the script-visible `WebSocket` constructor.
//!
//! The prelude's `WebSocket` class calls into `__badgeSocket.*`; those host
//! functions register the socket here and hand the connection to a
//! [`SocketConnector`] running on the tokio runtime.

use crate::events::{MessageData, SocketEvents};
use core::time::Duration;
use futures::future::BoxFuture;
use futures::{SinkExt as _, Stream, StreamExt as _};
use log::{debug, warn};
use std::collections::HashMap;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Close code reported when the connection ends without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Commands a script issues against an open socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketCommand {
    /// Send a text frame.
    SendText(String),
    /// Send a binary frame.
    SendBinary(Vec<u8>),
    /// Start the closing handshake.
    Close { code: u16, reason: String },
}

/// What a script asked to connect to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SocketRequest {
    /// Absolute `ws:` / `wss:` URL.
    pub url: String,
    /// Requested sub-protocols, in preference order.
    pub protocols: Vec<String>,
}

/// The host runtime's WebSocket client facility.
///
/// `connect` returns a future that owns the connection until it ends. It must
/// report every outcome through `events`, finishing with exactly one close event.
pub trait SocketConnector: Send + Sync {
    /// Drive a connection for `request`, obeying `commands` until closed.
    fn connect(
        &self,
        request: SocketRequest,
        commands: UnboundedReceiver<SocketCommand>,
        events: SocketEvents,
    ) -> BoxFuture<'static, ()>;
}

/// Live sockets keyed by id; an entry exists from `open` until its close event is dispatched.
#[derive(Debug, Default)]
pub struct SocketRegistry {
    next_id: u64,
    open: HashMap<u64, UnboundedSender<SocketCommand>>,
}

impl SocketRegistry {
    /// Register a socket and return its id.
    pub fn register(&mut self, commands: UnboundedSender<SocketCommand>) -> u64 {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.open.insert(self.next_id, commands);
        self.next_id
    }

    /// Forward a command to the connection task. Returns false if the socket is gone.
    pub fn command(&self, id: u64, command: SocketCommand) -> bool {
        self.open
            .get(&id)
            .is_some_and(|sender| sender.send(command).is_ok())
    }

    /// Forget a socket once its close event has been delivered.
    pub fn release(&mut self, id: u64) {
        self.open.remove(&id);
    }

    /// Number of sockets still in flight.
    pub fn len(&self) -> usize {
        self.open.len()
    }

    /// True when no socket is in flight.
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

/// [`SocketConnector`] backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

impl SocketConnector for TungsteniteConnector {
    fn connect(
        &self,
        request: SocketRequest,
        commands: UnboundedReceiver<SocketCommand>,
        events: SocketEvents,
    ) -> BoxFuture<'static, ()> {
        Box::pin(run_connection(request, commands, events))
    }
}

async fn run_connection(
    request: SocketRequest,
    mut commands: UnboundedReceiver<SocketCommand>,
    events: SocketEvents,
) {
    let mut client_request = match request.url.as_str().into_client_request() {
        Ok(client_request) => client_request,
        Err(error) => {
            events.error(error.to_string());
            events.close(ABNORMAL_CLOSURE, String::new(), false);
            return;
        }
    };
    if !request.protocols.is_empty()
        && let Ok(value) = HeaderValue::from_str(&request.protocols.join(", "))
    {
        client_request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", value);
    }

    let (stream, response) = match connect_async(client_request).await {
        Ok(connected) => connected,
        Err(error) => {
            debug!("socket {}: connect to {} failed: {error}", events.id(), request.url);
            events.error(error.to_string());
            events.close(ABNORMAL_CLOSURE, String::new(), false);
            return;
        }
    };
    let protocol = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    events.open(protocol);

    let (mut writer, mut reader) = stream.split();
    let mut commands_open = true;
    loop {
        tokio::select! {
            command = commands.recv(), if commands_open => {
                let outgoing = match command {
                    Some(SocketCommand::SendText(text)) => Message::Text(text.into()),
                    Some(SocketCommand::SendBinary(bytes)) => Message::Binary(bytes.into()),
                    Some(SocketCommand::Close { code, reason }) => Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    })),
                    None => {
                        // Every script handle is gone; finish the handshake quietly.
                        commands_open = false;
                        Message::Close(None)
                    }
                };
                if let Err(error) = writer.send(outgoing).await {
                    warn!("socket {}: write failed: {error}", events.id());
                    events.error(error.to_string());
                    events.close(ABNORMAL_CLOSURE, String::new(), false);
                    return;
                }
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.message(MessageData::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    events.message(MessageData::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |close_frame| {
                        (u16::from(close_frame.code), close_frame.reason.as_str().to_owned())
                    });
                    let was_clean = finish_closing_handshake(&mut reader, events.id()).await;
                    events.close(code, reason, was_clean);
                    return;
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(error)) => {
                    events.error(error.to_string());
                    events.close(ABNORMAL_CLOSURE, String::new(), false);
                    return;
                }
                None => {
                    events.close(ABNORMAL_CLOSURE, String::new(), false);
                    return;
                }
            }
        }
    }
}

/// Upper bound on waiting for the peer to drop the connection after close frames crossed.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Keep reading after a close frame arrived so tungstenite flushes its queued
/// reply, until the peer ends the stream. Returns whether that happened cleanly.
async fn finish_closing_handshake<S>(reader: &mut S, id: u64) -> bool
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let drained = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        loop {
            match reader.next().await {
                None => return true,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!("socket {id}: closing handshake failed: {error}");
                    return false;
                }
            }
        }
    })
    .await;
    drained.unwrap_or_else(|_| {
        debug!("socket {id}: peer kept the connection open after closing");
        false
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "test assertions")]

    use super::*;
    use crate::events::HostEvent;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::accept_async;

    /// Accept one WebSocket client on a loopback port and run `serve` on it.
    /// The server task yields every read error it saw.
    async fn loopback_server<F, Fut>(serve: F) -> (String, JoinHandle<Vec<String>>)
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + 'static,
        Fut: Future<Output = Vec<String>> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            serve(accept_async(tcp).await.unwrap()).await
        });
        (url, server)
    }

    /// Read until the client goes away, collecting errors.
    async fn read_to_end(
        socket: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        echo: bool,
    ) -> Vec<String> {
        let mut errors = Vec::new();
        while let Some(incoming) = socket.next().await {
            match incoming {
                Ok(message @ (Message::Text(_) | Message::Binary(_))) if echo => {
                    socket.send(message).await.unwrap();
                }
                Ok(_) => {}
                Err(error) => errors.push(format!("{error:?}")),
            }
        }
        errors
    }

    fn drain(receiver: &mut mpsc::UnboundedReceiver<HostEvent>) -> Vec<HostEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn echo_round_trip_and_client_close() {
        let (url, server) =
            loopback_server(|mut socket| async move { read_to_end(&mut socket, true).await }).await;
        let (event_sender, mut event_receiver) = mpsc::unbounded_channel();
        let (commands, command_receiver) = mpsc::unbounded_channel();
        commands.send(SocketCommand::SendText(String::from("hello"))).unwrap();
        commands.send(SocketCommand::SendBinary(vec![0, 255, 7])).unwrap();

        let connection = tokio::spawn(TungsteniteConnector.connect(
            SocketRequest { url, protocols: Vec::new() },
            command_receiver,
            SocketEvents::new(3, event_sender),
        ));
        // Wait for both echoes before closing.
        let mut seen = Vec::new();
        while seen.len() < 3 {
            seen.push(event_receiver.recv().await.unwrap());
        }
        commands
            .send(SocketCommand::Close { code: 1000, reason: String::from("bye") })
            .unwrap();
        connection.await.unwrap();
        seen.extend(drain(&mut event_receiver));

        assert_eq!(
            seen,
            [
                HostEvent::SocketOpen { id: 3, protocol: String::new() },
                HostEvent::SocketMessage { id: 3, data: MessageData::Text(String::from("hello")) },
                HostEvent::SocketMessage { id: 3, data: MessageData::Binary(vec![0, 255, 7]) },
                HostEvent::SocketClose {
                    id: 3,
                    code: 1000,
                    reason: String::from("bye"),
                    was_clean: true,
                },
            ]
        );
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_initiated_close_completes_handshake() {
        let (url, server) = loopback_server(|mut socket| async move {
            socket
                .close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "done".into(),
                }))
                .await
                .unwrap();
            read_to_end(&mut socket, false).await
        })
        .await;
        let (event_sender, mut event_receiver) = mpsc::unbounded_channel();
        let (_commands, command_receiver) = mpsc::unbounded_channel();

        TungsteniteConnector
            .connect(
                SocketRequest { url, protocols: Vec::new() },
                command_receiver,
                SocketEvents::new(1, event_sender),
            )
            .await;

        assert_eq!(
            drain(&mut event_receiver),
            [
                HostEvent::SocketOpen { id: 1, protocol: String::new() },
                HostEvent::SocketClose {
                    id: 1,
                    code: 1000,
                    reason: String::from("done"),
                    was_clean: true,
                },
            ]
        );
        // The peer saw our close reply rather than a reset.
        assert_eq!(server.await.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_abnormal_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/", listener.local_addr().unwrap());
        drop(listener);
        let (event_sender, mut event_receiver) = mpsc::unbounded_channel();
        let (_commands, command_receiver) = mpsc::unbounded_channel();

        TungsteniteConnector
            .connect(
                SocketRequest { url, protocols: Vec::new() },
                command_receiver,
                SocketEvents::new(2, event_sender),
            )
            .await;

        let events = drain(&mut event_receiver);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HostEvent::SocketError { id: 2, .. }));
        assert_eq!(
            events[1],
            HostEvent::SocketClose {
                id: 2,
                code: ABNORMAL_CLOSURE,
                reason: String::new(),
                was_clean: false,
            }
        );
    }

    #[test]
    fn registry_routes_commands_until_released() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut registry = SocketRegistry::default();
        let id = registry.register(sender);
        assert_eq!(id, 1);
        assert!(registry.command(id, SocketCommand::SendText(String::from("hi"))));
        assert_eq!(
            receiver.try_recv().ok(),
            Some(SocketCommand::SendText(String::from("hi")))
        );

        registry.release(id);
        assert!(registry.is_empty());
        assert!(!registry.command(id, SocketCommand::SendText(String::from("late"))));
    }

    #[test]
    fn command_to_finished_task_reports_failure() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut registry = SocketRegistry::default();
        let id = registry.register(sender);
        drop(receiver);
        assert!(!registry.command(id, SocketCommand::SendBinary(vec![1])));
        assert_eq!(registry.len(), 1);
    }
}
