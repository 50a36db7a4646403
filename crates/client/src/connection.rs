//! Connection manager: owns the single WebSocket for the selected conversation.
//!
//! Runs as one tokio task. Callers hold a [`ConnectionHandle`] which sends
//! [`ConnectionCommand`]s over an mpsc channel and observes
//! [`ConnectionState`] through a `watch` channel. Decoded frames are forwarded
//! in arrival order, tagged with the conversation and connect generation they
//! came from.
//!
//! The handshake and the backoff timer are stored futures polled from the
//! actor's `select!`, so commands are handled while either is pending.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use legion_protocol::{decode_frame, ClientMessage, InboundEvent};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::conversation_ws_url;
use crate::error::{ClientError, Result};
use crate::reconnect::{
    ReconnectDecision, ReconnectPolicy, ReconnectState, Sleeper, ABNORMAL_CLOSURE,
    NORMAL_CLOSURE, NO_STATUS_RECEIVED,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RetryTimer = Pin<Box<dyn Future<Output = ()> + Send>>;
type Handshake = Pin<Box<dyn Future<Output = HandshakeOutcome> + Send>>;

enum HandshakeOutcome {
    Opened(Box<WsStream>),
    Failed(tungstenite::Error),
    TimedOut,
}

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No conversation selected
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff before attempt number `attempt`
    Reconnecting { attempt: u32, delay: Duration },
    /// Closed and not retrying
    Closed { code: u16 },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// A decoded frame and the connection that delivered it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub conversation_id: String,
    /// Value returned by the [`ConnectionHandle::connect`] call that opened the socket
    pub generation: u64,
    pub event: InboundEvent,
}

#[derive(Debug)]
pub enum ConnectionCommand {
    /// Select a conversation; tears down any existing socket or handshake first.
    Connect {
        conversation_id: String,
        generation: u64,
    },
    /// Clean close (1000) and clear the selection.
    Disconnect,
    Send {
        message: ClientMessage,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Page/terminal visibility. Becoming visible reconnects a dropped socket.
    VisibilityChanged { visible: bool },
}

/// Handle to the running connection actor (cheap to Clone).
#[derive(Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::Sender<ConnectionCommand>,
    state_rx: watch::Receiver<ConnectionState>,
    generation: Arc<AtomicU64>,
}

impl ConnectionHandle {
    /// Spawn the actor. Returns the handle and the inbound event stream.
    pub fn spawn(
        ws_base: impl Into<String>,
        policy: ReconnectPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> (Self, mpsc::Receiver<TaggedEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let actor = ConnectionActor {
            ws_base: ws_base.into(),
            reconnect: ReconnectState::new(policy),
            sleeper,
            events_tx,
            state_tx,
            selected: None,
            generation: 0,
            socket: None,
            handshake: None,
            retry: None,
        };
        tokio::spawn(actor.run(command_rx));

        (Self::from_parts(command_tx, state_rx), events_rx)
    }

    /// Create a handle from pre-built parts.
    pub fn from_parts(
        command_tx: mpsc::Sender<ConnectionCommand>,
        state_rx: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            command_tx,
            state_rx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn command(&self, cmd: ConnectionCommand) -> Result<()> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| ClientError::ActorStopped)
    }

    /// Select a conversation. Returns the generation its events will carry.
    pub async fn connect(&self, conversation_id: impl Into<String>) -> Result<u64> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.command(ConnectionCommand::Connect {
            conversation_id: conversation_id.into(),
            generation,
        })
        .await?;
        Ok(generation)
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.command(ConnectionCommand::Disconnect).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<()> {
        self.command(ConnectionCommand::VisibilityChanged { visible })
            .await
    }

    /// Send one message over the open socket.
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(ConnectionCommand::Send { message, reply })
            .await?;
        rx.await.map_err(|_| ClientError::ActorStopped)?
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.state_rx.borrow().is_open()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

struct ConnectionActor {
    ws_base: String,
    reconnect: ReconnectState,
    sleeper: Arc<dyn Sleeper>,
    events_tx: mpsc::Sender<TaggedEvent>,
    state_tx: watch::Sender<ConnectionState>,
    selected: Option<String>,
    generation: u64,
    socket: Option<WsStream>,
    handshake: Option<Handshake>,
    retry: Option<RetryTimer>,
}

async fn next_frame(
    socket: &mut Option<WsStream>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn handshake_done(handshake: &mut Option<Handshake>) -> HandshakeOutcome {
    match handshake {
        Some(pending) => pending.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn retry_due(retry: &mut Option<RetryTimer>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

impl ConnectionActor {
    async fn run(mut self, mut command_rx: mpsc::Receiver<ConnectionCommand>) {
        loop {
            tokio::select! {
                cmd = command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        self.handshake = None;
                        self.close_socket().await;
                        debug!(
                            component = "connection",
                            event = "connection.actor.stopped",
                            "All handles dropped, stopping connection actor"
                        );
                        return;
                    }
                },
                frame = next_frame(&mut self.socket) => self.handle_frame(frame).await,
                outcome = handshake_done(&mut self.handshake) => {
                    self.handshake = None;
                    self.finish_handshake(outcome);
                }
                () = retry_due(&mut self.retry) => {
                    self.retry = None;
                    self.start_handshake();
                }
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    async fn handle_command(&mut self, cmd: ConnectionCommand) {
        match cmd {
            ConnectionCommand::Connect {
                conversation_id,
                generation,
            } => {
                self.handshake = None;
                self.close_socket().await;
                self.retry = None;
                self.reconnect.reset();
                self.selected = Some(conversation_id);
                self.generation = generation;
                self.start_handshake();
            }
            ConnectionCommand::Disconnect => {
                self.selected = None;
                self.handshake = None;
                self.retry = None;
                self.reconnect.reset();
                self.close_socket().await;
                self.set_state(ConnectionState::Idle);
            }
            ConnectionCommand::Send { message, reply } => {
                let result = self.send_message(&message).await;
                if reply.send(result).is_err() {
                    debug!(
                        component = "connection",
                        event = "connection.send.reply_dropped",
                        "Sender stopped waiting for send result"
                    );
                }
            }
            ConnectionCommand::VisibilityChanged { visible } => {
                if visible && self.socket.is_none() && self.selected.is_some() {
                    info!(
                        component = "connection",
                        event = "connection.visibility.reconnect",
                        "Visible again without a live socket, reconnecting now"
                    );
                    self.handshake = None;
                    self.retry = None;
                    self.reconnect.reset();
                    self.start_handshake();
                }
            }
        }
    }

    async fn send_message(&mut self, message: &ClientMessage) -> Result<()> {
        let Some(ws) = self.socket.as_mut() else {
            return Err(ClientError::NotConnected);
        };
        let text = serde_json::to_string(message)?;
        ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    /// Begin a handshake for the selected conversation. Any previous one is dropped.
    fn start_handshake(&mut self) {
        let Some(conversation_id) = self.selected.as_deref() else {
            return;
        };
        let url = conversation_ws_url(&self.ws_base, conversation_id);
        debug!(
            component = "connection",
            event = "connection.connecting",
            conversation_id = %conversation_id,
            url = %url,
            "Opening WebSocket"
        );
        self.set_state(ConnectionState::Connecting);
        self.handshake = Some(Box::pin(async move {
            match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
                Ok(Ok((ws, _response))) => HandshakeOutcome::Opened(Box::new(ws)),
                Ok(Err(e)) => HandshakeOutcome::Failed(e),
                Err(_) => HandshakeOutcome::TimedOut,
            }
        }));
    }

    fn finish_handshake(&mut self, outcome: HandshakeOutcome) {
        let conversation_id = self.selected.clone().unwrap_or_default();
        match outcome {
            HandshakeOutcome::Opened(ws) => {
                info!(
                    component = "connection",
                    event = "connection.opened",
                    conversation_id = %conversation_id,
                    generation = self.generation,
                    "WebSocket connected"
                );
                self.socket = Some(*ws);
                self.reconnect.on_open();
                self.set_state(ConnectionState::Open);
            }
            HandshakeOutcome::Failed(e) => {
                warn!(
                    component = "connection",
                    event = "connection.connect_failed",
                    conversation_id = %conversation_id,
                    error = %e,
                    "WebSocket connect failed"
                );
                self.handle_close(ABNORMAL_CLOSURE);
            }
            HandshakeOutcome::TimedOut => {
                warn!(
                    component = "connection",
                    event = "connection.connect_timeout",
                    conversation_id = %conversation_id,
                    timeout_secs = CONNECT_TIMEOUT.as_secs(),
                    "WebSocket connect timed out"
                );
                self.handle_close(ABNORMAL_CLOSURE);
            }
        }
    }

    async fn close_socket(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: String::new().into(),
            };
            if let Err(e) = ws.close(Some(frame)).await {
                debug!(
                    component = "connection",
                    event = "connection.close_failed",
                    error = %e,
                    "Ignoring error while closing socket"
                );
            }
        }
    }

    async fn handle_frame(
        &mut self,
        frame: Option<std::result::Result<Message, tungstenite::Error>>,
    ) {
        let Some(conversation_id) = self.selected.clone() else {
            self.socket = None;
            return;
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(event) = decode_frame(text.as_str()) {
                    let tagged = TaggedEvent {
                        conversation_id,
                        generation: self.generation,
                        event,
                    };
                    if self.events_tx.send(tagged).await.is_err() {
                        debug!(
                            component = "connection",
                            event = "connection.events.receiver_dropped",
                            "No one is listening for events"
                        );
                    }
                }
            }
            Some(Ok(Message::Binary(data))) => {
                warn!(
                    component = "connection",
                    event = "codec.frame.dropped",
                    payload_bytes = data.len(),
                    "Dropping non-text frame"
                );
            }
            Some(Ok(Message::Close(close))) => {
                let code = close
                    .map(|f| u16::from(f.code))
                    .unwrap_or(NO_STATUS_RECEIVED);
                info!(
                    component = "connection",
                    event = "connection.closed",
                    conversation_id = %conversation_id,
                    code,
                    "Server closed the socket"
                );
                self.socket = None;
                self.handle_close(code);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(
                    component = "connection",
                    event = "connection.read_failed",
                    conversation_id = %conversation_id,
                    error = %e,
                    "WebSocket read failed"
                );
                self.socket = None;
                self.handle_close(ABNORMAL_CLOSURE);
            }
            None => {
                self.socket = None;
                self.handle_close(ABNORMAL_CLOSURE);
            }
        }
    }

    /// Decide what follows a close: a scheduled retry, or staying closed.
    fn handle_close(&mut self, code: u16) {
        let selected = self.selected.is_some();
        match self.reconnect.on_close(code, selected) {
            ReconnectDecision::Retry { attempt, delay } => {
                info!(
                    component = "connection",
                    event = "connection.reconnect.scheduled",
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    code,
                    "Scheduling reconnect"
                );
                let sleeper = Arc::clone(&self.sleeper);
                self.retry = Some(Box::pin(async move { sleeper.sleep(delay).await }));
                self.set_state(ConnectionState::Reconnecting { attempt, delay });
            }
            ReconnectDecision::GiveUp => {
                warn!(
                    component = "connection",
                    event = "connection.reconnect.exhausted",
                    attempts = self.reconnect.attempts(),
                    code,
                    "Giving up on reconnecting"
                );
                self.set_state(ConnectionState::Closed { code });
            }
            ReconnectDecision::Stay => {
                if code != NORMAL_CLOSURE {
                    debug!(
                        component = "connection",
                        event = "connection.closed.unselected",
                        code,
                        "Closed with nothing selected"
                    );
                }
                self.set_state(ConnectionState::Closed { code });
            }
        }
    }
}
