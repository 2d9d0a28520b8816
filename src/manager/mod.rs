//! Session facade: reactive connection and message state for a chat view.
//!
//! [`SessionManager`] owns one [`MessageBus`] and one [`SocketSession`] per
//! `init`, folds bus events into a [`SessionSnapshot`], and exposes it both as
//! a snapshot getter and as a `tokio::sync::watch` channel.

mod state;

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bus::{BusEvent, ListenerId, MessageBus};
use crate::config::SessionConfig;
use crate::message::{create_message, Message, MessageBody, MessageType};
use crate::session::{SessionError, SessionState, SocketSession, Transport, WebSocketTransport};

pub use state::SessionSnapshot;

struct ActiveSession {
    config: SessionConfig,
    bus: Arc<MessageBus>,
    session: SocketSession,
    /// Taken by the first successful connect.
    pending_prompt: Mutex<Option<String>>,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    state: Arc<watch::Sender<SessionSnapshot>>,
    active: Option<ActiveSession>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            transport,
            state: Arc::new(state),
            active: None,
        }
    }

    /// Manager backed by the production WebSocket transport.
    pub fn websocket() -> Self {
        Self::new(Arc::new(WebSocketTransport::new()))
    }

    /// Build a fresh bus and session for `config`, replacing any previous one.
    ///
    /// With `auto_connect` set, connects once before returning; a failed
    /// attempt is returned but leaves the manager initialised so the caller
    /// can retry with [`SessionManager::connect`].
    pub async fn init(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if self.active.is_some() {
            debug!("re-initialising session manager");
            self.teardown();
        }

        self.state.send_replace(SessionSnapshot::default());

        let bus = Arc::new(MessageBus::new());
        let state = self.state.clone();
        bus.subscribe(move |event| {
            state.send_if_modified(|snapshot| snapshot.apply(event));
        });

        let session = SocketSession::new(config.connect_request(), self.transport.clone(), bus.clone())
            .with_connect_timeout(config.connect_timeout());

        info!(?config, "session manager initialised");
        let auto_connect = config.auto_connect;
        self.active = Some(ActiveSession {
            pending_prompt: Mutex::new(config.initial_prompt.clone()),
            config,
            bus,
            session,
        });

        if auto_connect {
            self.connect().await?;
        }
        Ok(())
    }

    pub fn is_initialised(&self) -> bool {
        self.active.is_some()
    }

    fn active(&self) -> Result<&ActiveSession, SessionError> {
        self.active.as_ref().ok_or(SessionError::NotInitialised)
    }

    /// Connect the session, then send the configured initial prompt if it has
    /// not been sent yet.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let active = self.active()?;
        self.state.send_if_modified(|snapshot| snapshot.error.take().is_some());

        active.session.connect().await?;

        let prompt = active
            .pending_prompt
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(prompt) = prompt {
            debug!("sending initial prompt");
            if let Err(e) = self.send_message(MessageBody::user(prompt)) {
                warn!("failed to send initial prompt: {e}");
            }
        }
        Ok(())
    }

    pub fn disconnect(&self) {
        if let Some(active) = &self.active {
            active.session.disconnect();
        }
    }

    /// Stamp and send an envelope. `user` envelopes are appended to the local
    /// log because the backend does not echo them.
    pub fn send_message(&self, body: MessageBody) -> Result<Message, SessionError> {
        let active = self.active()?;
        if !active.session.get_connected() {
            return Err(SessionError::NotConnected);
        }

        let message = create_message(body);
        active.session.send_message(&message)?;

        if message.message_type() == Some(MessageType::User) {
            self.state.send_modify(|snapshot| snapshot.record(message.clone()));
        }
        Ok(message)
    }

    /// Send an envelope given its type and raw `data`.
    pub fn send(&self, kind: MessageType, data: Value) -> Result<Message, SessionError> {
        let body = MessageBody::from_type(kind, data).map_err(|e| SessionError::Encode(e.to_string()))?;
        self.send_message(body)
    }

    pub fn send_user_text(&self, text: impl Into<String>) -> Result<Message, SessionError> {
        self.send_message(MessageBody::user(text))
    }

    /// Empty the message log. The connection is left alone.
    pub fn clear_messages(&self) {
        self.state.send_if_modified(SessionSnapshot::clear_messages);
    }

    /// Disconnect, then detach every bus listener.
    pub fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.session.disconnect();
        active.bus.clear();
        info!(url = %active.config.url, "session manager torn down");
    }

    /// Observe the same bus events the manager folds into its state.
    ///
    /// Listeners belong to the current session and are dropped by `teardown`
    /// or a later `init`.
    pub fn subscribe<F>(&self, listener: F) -> Result<ListenerId, SessionError>
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        Ok(self.active()?.bus.subscribe(listener))
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.active
            .as_ref()
            .map(|active| active.bus.unsubscribe(id))
            .unwrap_or(false)
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_connected
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn preview_url(&self) -> Option<String> {
        self.state.borrow().preview_url.clone()
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.active.as_ref().map(|active| active.session.state())
    }

    pub fn bus(&self) -> Option<Arc<MessageBus>> {
        self.active.as_ref().map(|active| active.bus.clone())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_init() {
        let manager = SessionManager::websocket();
        assert!(!manager.is_initialised());
        assert_eq!(manager.connect().await, Err(SessionError::NotInitialised));
        assert_eq!(
            manager.send_user_text("hi").unwrap_err(),
            SessionError::NotInitialised
        );
        assert!(manager.subscribe(|_| {}).is_err());
        assert_eq!(manager.session_state(), None);
        manager.disconnect();
        manager.clear_messages();
    }

    #[tokio::test]
    async fn test_init_without_auto_connect_stays_idle() {
        let mut manager = SessionManager::websocket();
        manager
            .init(SessionConfig::new("wss://agent.test", "abc"))
            .await
            .unwrap();

        assert!(manager.is_initialised());
        assert_eq!(manager.session_state(), Some(SessionState::Idle));
        assert!(!manager.is_connected());
        assert_eq!(
            manager.send_user_text("hi").unwrap_err(),
            SessionError::NotConnected
        );
        assert!(manager.messages().is_empty());

        manager.teardown();
        assert!(!manager.is_initialised());
        assert!(manager.bus().is_none());
    }
}
