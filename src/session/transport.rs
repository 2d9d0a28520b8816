//! Transport seam for the socket session.
//!
//! A [`Transport`] opens one authenticated duplex connection and hands back
//! its two halves: a [`FrameSink`] for outbound text frames and a
//! [`FrameStream`] of inbound text frames. [`WebSocketTransport`] is the
//! production implementation over `tokio-tungstenite`; tests plug in
//! channel-backed fakes.

use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, trace, warn};

/// Default time allowed for the open + auth handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Query parameter used by [`AuthMethod::QueryParam`] when none is configured.
pub const DEFAULT_TOKEN_PARAM: &str = "token";

// ============================================================================
// Transport Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Authentication rejected by server (HTTP {status})")]
    AuthRejected { status: u16 },
    #[error("Handshake rejected by server (HTTP {status})")]
    HandshakeRejected { status: u16 },
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Connection closed by server")]
    Closed,
}

impl TransportError {
    pub fn connection<E: fmt::Display>(err: E) -> Self {
        TransportError::Connection(err.to_string())
    }

    pub fn io<E: fmt::Display>(err: E) -> Self {
        TransportError::Io(err.to_string())
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            TransportError::AuthRejected { .. } | TransportError::InvalidCredentials(_)
        )
    }

    /// Whether a fresh attempt could plausibly succeed without caller changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_)
                | TransportError::Timeout(_)
                | TransportError::Io(_)
                | TransportError::Closed
        )
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Where the token travels during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthMethod {
    /// `Authorization: Bearer <token>` on the upgrade request.
    #[default]
    BearerHeader,
    /// Token appended to the endpoint URL as a query parameter.
    QueryParam {
        #[serde(default = "default_token_param")]
        name: String,
    },
}

fn default_token_param() -> String {
    DEFAULT_TOKEN_PARAM.to_string()
}

impl FromStr for AuthMethod {
    type Err = String;

    /// Accepts `header`, `query` or `query:<param>`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value.to_ascii_lowercase().as_str() {
            "header" | "bearer" | "bearer_header" => return Ok(Self::BearerHeader),
            "query" | "query_param" => {
                return Ok(Self::QueryParam {
                    name: default_token_param(),
                })
            }
            _ => {}
        }
        match value.split_once(':') {
            Some((mode, name)) if mode.eq_ignore_ascii_case("query") && !name.trim().is_empty() => {
                Ok(Self::QueryParam {
                    name: name.trim().to_string(),
                })
            }
            _ => Err(format!(
                "unsupported auth mode '{value}'. Use header, query or query:<param>"
            )),
        }
    }
}

/// Everything a transport needs to open one authenticated connection.
#[derive(Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub token: String,
    pub auth: AuthMethod,
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("token", &redacted(&self.token))
            .field("auth", &self.auth)
            .finish()
    }
}

pub(crate) fn redacted(token: &str) -> &'static str {
    if token.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl ConnectRequest {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            auth: AuthMethod::default(),
        }
    }

    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }

    /// Endpoint to dial, with the token attached for query-param auth.
    /// Never log the returned value.
    pub fn authorized_url(&self) -> String {
        match &self.auth {
            AuthMethod::QueryParam { name } if self.has_token() => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}{}={}",
                    self.url,
                    separator,
                    urlencoding::encode(name),
                    urlencoding::encode(&self.token)
                )
            }
            _ => self.url.clone(),
        }
    }

    /// `Authorization` header value for bearer auth.
    pub fn bearer_header(&self) -> Option<String> {
        match self.auth {
            AuthMethod::BearerHeader if self.has_token() => Some(format!("Bearer {}", self.token)),
            _ => None,
        }
    }
}

// ============================================================================
// Transport Trait
// ============================================================================

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection and complete the authentication handshake.
    ///
    /// Returns only once the backend has accepted the credentials; the
    /// returned halves are ready for traffic. The stream ends when the peer
    /// closes the connection.
    async fn open(&self, request: &ConnectRequest) -> Result<(FrameSink, FrameStream), TransportError>;
}

// ============================================================================
// WebSocket Transport
// ============================================================================

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// WebSocket transport for `ws://` and `wss://` agent endpoints.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, request: &ConnectRequest) -> Result<(FrameSink, FrameStream), TransportError> {
        INSTALL_CRYPTO_PROVIDER.call_once(|| {
            // Another component may have installed one already.
            let _ = rustls::crypto::ring::default_provider().install_default();
        });

        let mut ws_request = request
            .authorized_url()
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;

        match request.bearer_header() {
            Some(value) => {
                let mut value = HeaderValue::from_str(&value).map_err(|_| {
                    TransportError::InvalidCredentials(
                        "token contains characters not allowed in a header".to_string(),
                    )
                })?;
                value.set_sensitive(true);
                ws_request.headers_mut().insert(AUTHORIZATION, value);
            }
            None if !request.has_token() => {
                warn!("opening agent connection without a token");
            }
            None => {}
        }

        let (ws, response) = connect_async(ws_request).await.map_err(map_handshake_error)?;
        debug!(status = %response.status(), "websocket upgrade accepted");

        let (sink, stream) = ws.split();

        let sink = sink
            .with(|frame: String| future::ready(Ok::<_, WsError>(WsMessage::Text(frame.into()))))
            .sink_map_err(TransportError::connection);

        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                // Some backends push JSON as binary frames.
                Ok(WsMessage::Binary(bytes)) => Some(Ok(String::from_utf8_lossy(&bytes).into_owned())),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "server sent close frame");
                    None
                }
                Ok(other) => {
                    trace!("ignoring control frame: {:?}", other);
                    None
                }
                Err(WsError::ConnectionClosed) => None,
                Err(e) => Some(Err(TransportError::connection(e))),
            })
        });

        let sink: FrameSink = Box::pin(sink);
        let stream: FrameStream = Box::pin(stream);
        Ok((sink, stream))
    }
}

fn map_handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                TransportError::AuthRejected { status }
            } else {
                TransportError::HandshakeRejected { status }
            }
        }
        WsError::Url(e) => TransportError::InvalidEndpoint(e.to_string()),
        WsError::Io(e) => TransportError::io(e),
        other => TransportError::connection(other),
    }
}

// ============================================================================
// Tests
// ============================================================================
