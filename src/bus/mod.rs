//! In-process message bus between the socket session and its consumers.
//!
//! The bus provides:
//! - Decoding of raw inbound frames into typed [`crate::message::Message`]s
//! - Lifecycle events (connected, disconnected, failed) for the same listeners
//! - Synchronous fan-out to any number of listeners, in arrival order
//!
//! There is no buffering: an event that arrives while nobody listens, or after
//! [`MessageBus::clear`], is gone.

mod event_bus;

pub use event_bus::{BusEvent, ListenerId, MessageBus};
