use crate::bus::BusEvent;
use crate::message::Message;

/// Observable state a chat view renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub is_connected: bool,
    /// Every received envelope plus locally sent `user` envelopes, in order.
    pub messages: Vec<Message>,
    /// Last connection or decode failure. Cleared on connect.
    pub error: Option<String>,
    /// Latest preview URL announced by an `update_file` envelope.
    pub preview_url: Option<String>,
    /// Latest error text reported by the agent itself.
    pub agent_error: Option<String>,
    /// Bumped every time the log is cleared, so observers that miss the
    /// empty state still notice the reset.
    pub clear_count: u64,
}

impl SessionSnapshot {
    /// Fold one bus event into the snapshot. Returns whether anything changed.
    pub fn apply(&mut self, event: &BusEvent) -> bool {
        match event {
            BusEvent::Connected => {
                let changed = !self.is_connected || self.error.is_some();
                self.is_connected = true;
                self.error = None;
                changed
            }
            BusEvent::Disconnected => std::mem::replace(&mut self.is_connected, false),
            BusEvent::Received(message) => {
                self.record(message.clone());
                true
            }
            BusEvent::Failed(reason) => {
                self.error = Some(reason.clone());
                true
            }
        }
    }

    pub(crate) fn record(&mut self, message: Message) {
        if let Some(url) = message.preview_url() {
            self.preview_url = Some(url.to_string());
        }
        if let Some(error) = message.agent_error() {
            self.agent_error = Some(error);
        }
        self.messages.push(message);
    }

    pub(crate) fn clear_messages(&mut self) -> bool {
        if self.messages.is_empty() {
            return false;
        }
        self.messages.clear();
        self.clear_count += 1;
        true
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}
