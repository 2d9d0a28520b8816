//! Socket session: the single owner of one authenticated agent connection.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::transport::{
    ConnectRequest, FrameSink, FrameStream, Transport, TransportError, DEFAULT_CONNECT_TIMEOUT,
};
use crate::bus::MessageBus;
use crate::message::Message;

/// Lifecycle of a [`SocketSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected.
    Idle,
    /// Handshake in flight.
    Connecting,
    /// Authenticated and carrying traffic.
    Open,
    /// Close requested; the connection is being shut down.
    Closing,
    Closed,
    /// Handshake or connection failed. A new `connect()` may be attempted.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Session is already {0}")]
    AlreadyActive(SessionState),

    #[error("Connection attempt cancelled by disconnect")]
    Cancelled,

    #[error("Session has not been initialised")]
    NotInitialised,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, SessionError::NotConnected)
    }
}

struct SessionInner {
    state: SessionState,
    /// Bumped on every `connect()`; tasks from older attempts compare against it.
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

/// One authenticated real-time connection and its lifecycle.
///
/// The session publishes what happens on the wire to its [`MessageBus`]:
/// `Connected` after a successful handshake, every inbound frame verbatim via
/// [`MessageBus::dispatch_message`], `Failed` on handshake or connection
/// errors, and `Disconnected` exactly once per successful `connect()`.
///
/// It never retries on its own. After a failure or a drop, the owner decides
/// whether to call [`SocketSession::connect`] again.
pub struct SocketSession {
    request: ConnectRequest,
    connect_timeout: Duration,
    transport: Arc<dyn Transport>,
    bus: Arc<MessageBus>,
    inner: Arc<Mutex<SessionInner>>,
}

impl fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSession")
            .field("request", &self.request)
            .field("connect_timeout", &self.connect_timeout)
            .field("state", &self.state())
            .finish()
    }
}

impl SocketSession {
    pub fn new(request: ConnectRequest, transport: Arc<dyn Transport>, bus: Arc<MessageBus>) -> Self {
        Self {
            request,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            transport,
            bus,
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Idle,
                generation: 0,
                outbound: None,
            })),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.request.url
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state
    }

    /// `true` only while the session is `Open`.
    pub fn get_connected(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Open and authenticate the connection.
    ///
    /// Fails immediately with [`SessionError::AlreadyActive`] while a previous
    /// attempt is connecting or open. Transport failures leave the session
    /// `Failed`, are published on the bus and returned.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let generation = {
            let mut inner = lock(&self.inner);
            if matches!(inner.state, SessionState::Connecting | SessionState::Open) {
                return Err(SessionError::AlreadyActive(inner.state));
            }
            inner.state = SessionState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        info!(
            url = %self.request.url,
            token = if self.request.has_token() { "SET" } else { "NOT SET" },
            "connecting to agent backend"
        );

        let (sink, stream) = match self.open_transport().await {
            Ok(halves) => halves,
            Err(err) => return Err(self.fail_attempt(generation, err)),
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        {
            let mut inner = lock(&self.inner);
            if inner.generation != generation || inner.state != SessionState::Connecting {
                drop(inner);
                debug!("connection opened after the attempt was cancelled, closing it");
                tokio::spawn(close_quietly(sink));
                return Err(SessionError::Cancelled);
            }
            inner.state = SessionState::Open;
            inner.outbound = Some(outbound_tx);
        }

        info!(url = %self.request.url, "agent session open");
        self.bus.dispatch_connect();

        tokio::spawn(drive_connection(
            sink,
            stream,
            outbound_rx,
            self.bus.clone(),
            self.inner.clone(),
            generation,
        ));
        Ok(())
    }

    async fn open_transport(&self) -> Result<(FrameSink, FrameStream), TransportError> {
        if self.request.url.trim().is_empty() {
            return Err(TransportError::InvalidEndpoint(
                "endpoint URL is empty".to_string(),
            ));
        }
        match tokio::time::timeout(self.connect_timeout, self.transport.open(&self.request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        }
    }

    fn fail_attempt(&self, generation: u64, err: TransportError) -> SessionError {
        {
            let mut inner = lock(&self.inner);
            if inner.generation != generation || inner.state != SessionState::Connecting {
                debug!("connection attempt failed after it was cancelled: {err}");
                return SessionError::Cancelled;
            }
            inner.state = SessionState::Failed;
        }
        error!(url = %self.request.url, "connection attempt failed: {err}");
        self.bus.dispatch_error(err.to_string());
        SessionError::Transport(err)
    }

    /// Request the connection to close. Never fails; a no-op unless the
    /// session is connecting or open.
    pub fn disconnect(&self) {
        let was_open = {
            let mut inner = lock(&self.inner);
            match inner.state {
                SessionState::Open => {
                    // The connection task finishes the close and moves to Closed.
                    inner.state = SessionState::Closing;
                    inner.outbound.take();
                    true
                }
                SessionState::Connecting => {
                    inner.state = SessionState::Closed;
                    false
                }
                _ => return,
            }
        };

        info!(url = %self.request.url, "agent session closed by caller");
        if was_open {
            self.bus.dispatch_disconnect();
        }
    }

    /// Serialize `message` and queue it on the open connection.
    ///
    /// The state check and the hand-off to the connection task happen under a
    /// single lock, so nothing is written unless the session is `Open`.
    pub fn send_message(&self, message: &Message) -> Result<(), SessionError> {
        let inner = lock(&self.inner);
        let outbound = match (inner.state, inner.outbound.as_ref()) {
            (SessionState::Open, Some(outbound)) => outbound,
            _ => return Err(SessionError::NotConnected),
        };
        let frame = message
            .to_json()
            .map_err(|e| SessionError::Encode(e.to_string()))?;
        outbound
            .send(frame)
            .map_err(|_| SessionError::NotConnected)?;
        debug!(kind = message.kind(), id = %message.id, "queued outbound message");
        Ok(())
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        let state = self.state();
        if matches!(state, SessionState::Open | SessionState::Connecting) {
            debug!("socket session dropped while {state}, disconnecting");
            self.disconnect();
        }
    }
}

fn lock(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns both halves of an open connection until it ends.
///
/// Outbound frames are written in the order they were queued; inbound frames
/// are forwarded to the bus in the order the transport yields them.
async fn drive_connection(
    mut sink: FrameSink,
    mut stream: FrameStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    bus: Arc<MessageBus>,
    inner: Arc<Mutex<SessionInner>>,
    generation: u64,
) {
    let failure = loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                // Sender dropped: the caller asked to disconnect.
                let Some(frame) = frame else { break None };
                trace!("writing frame ({} bytes)", frame.len());
                if let Err(e) = sink.send(frame).await {
                    break Some(e);
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(frame)) => {
                        if !is_open(&inner, generation) {
                            trace!("session no longer open, dropping inbound frame");
                            continue;
                        }
                        trace!("received frame ({} bytes)", frame.len());
                        bus.dispatch_message(&frame);
                    }
                    Some(Err(e)) => break Some(e),
                    None => break Some(TransportError::Closed),
                }
            }
        }
    };

    match failure {
        None => {
            if let Err(e) = sink.close().await {
                debug!("error while closing connection: {e}");
            }
            let mut inner = lock(&inner);
            if inner.generation == generation && inner.state == SessionState::Closing {
                inner.state = SessionState::Closed;
            }
            debug!("connection closed");
        }
        Some(err) => {
            let dropped = {
                let mut inner = lock(&inner);
                if inner.generation != generation {
                    false
                } else {
                    match inner.state {
                        SessionState::Open => {
                            inner.state = if err == TransportError::Closed {
                                SessionState::Closed
                            } else {
                                SessionState::Failed
                            };
                            inner.outbound.take();
                            true
                        }
                        SessionState::Closing => {
                            inner.state = SessionState::Closed;
                            false
                        }
                        _ => false,
                    }
                }
            };

            if dropped {
                warn!("agent connection lost: {err}");
                if err != TransportError::Closed {
                    bus.dispatch_error(err.to_string());
                }
                bus.dispatch_disconnect();
            }
            close_quietly(sink).await;
        }
    }
}

fn is_open(inner: &Mutex<SessionInner>, generation: u64) -> bool {
    let inner = lock(inner);
    inner.generation == generation && inner.state == SessionState::Open
}

async fn close_quietly(mut sink: FrameSink) {
    if let Err(e) = sink.close().await {
        trace!("ignoring close error: {e}");
    }
}
