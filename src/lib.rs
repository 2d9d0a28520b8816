//! Client library for a real-time coding-agent backend.
//!
//! It handles:
//! - Typed message envelopes and their JSON wire form
//! - An in-process message bus with lifecycle events
//! - One authenticated WebSocket session with an explicit state machine
//! - A facade that folds bus events into observable chat state
//!
//! # Architecture
//!
//! - `message`: envelope types, decoding and construction
//! - `bus`: listener registry and event dispatch
//! - `session`: transport seam, WebSocket transport, connection lifecycle
//! - `manager`: session facade and observable snapshot
//! - `config`: endpoint, credentials and connection options

pub mod bus;
pub mod config;
pub mod manager;
pub mod message;
pub mod session;

pub use bus::{BusEvent, ListenerId, MessageBus};
pub use config::{ConfigError, SessionConfig};
pub use manager::{SessionManager, SessionSnapshot};
pub use message::{create_message, Message, MessageBody, MessageType};
pub use session::{SessionError, SessionState, SocketSession, TransportError};

/// Install the fmt subscriber, filtered by `RUST_LOG` or `mojolink=debug,info`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mojolink=debug,info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
