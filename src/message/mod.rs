//! Message envelopes exchanged with the agent backend.
//!
//! Every frame on the socket is one JSON envelope:
//! `{"id": "...", "type": "update_file", "data": {...}, "timestamp": 1700000000000}`.
//! `data` is decoded into a typed [`MessageBody`] per discriminant; frames with
//! a discriminant this crate does not know are kept as [`MessageBody::Unknown`].

mod envelope;
mod kind;

pub use envelope::{
    create_message, AgentError, AgentText, DataMap, FileUpdate, Message, MessageBody,
    MessageError, UserMessage, USER_SENDER,
};
pub use kind::MessageType;
