//! Authenticated real-time connection to the agent backend.
//!
//! This module provides:
//! - [`Transport`]: the seam that opens a bidirectional text-frame channel
//! - [`WebSocketTransport`]: the production transport (WebSocket over rustls)
//! - [`SocketSession`]: the connection lifecycle state machine that feeds a
//!   [`crate::bus::MessageBus`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mojolink_lib::bus::MessageBus;
//! use mojolink_lib::message::{create_message, MessageBody};
//! use mojolink_lib::session::{ConnectRequest, SocketSession, WebSocketTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(MessageBus::new());
//! let session = SocketSession::new(
//!     ConnectRequest::new("wss://agent.example.com/ws", "secret"),
//!     Arc::new(WebSocketTransport::new()),
//!     bus.clone(),
//! );
//! session.connect().await?;
//! session.send_message(&create_message(MessageBody::user("Build a todo app")))?;
//! session.disconnect();
//! # Ok(())
//! # }
//! ```

mod socket;
mod transport;

pub(crate) use transport::redacted;
pub use socket::{SessionError, SessionState, SocketSession};
pub use transport::{
    AuthMethod, ConnectRequest, FrameSink, FrameStream, Transport, TransportError,
    WebSocketTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_TOKEN_PARAM,
};
