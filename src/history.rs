//! Bounded history of recent chat messages
//!
//! Replayed to every newly authenticated session so late joiners see the
//! conversation they missed.

use std::collections::VecDeque;

use tracing::debug;

use crate::message::ChatMessage;
use crate::session::SessionHandle;

/// Default number of messages kept
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug)]
pub struct HistoryRing {
    messages: VecDeque<ChatMessage>,
    capacity: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
            capacity,
        }
    }

    /// Push a message, evicting the oldest one past capacity
    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
        }
    }

    /// Send the buffered messages to one session, bracketed by notices
    pub fn snapshot_replay(&self, target: &SessionHandle) {
        if self.messages.is_empty() {
            return;
        }

        let count = self.messages.len();
        debug!("Replaying {} history messages to {}", count, target.id);

        let _ = target.send_message(ChatMessage::system(format!(
            "--- History: last {} messages ---",
            count
        )));
        for message in &self.messages {
            if target.send_message(message.clone()).is_err() {
                debug!("History replay to {} cut short", target.id);
                return;
            }
        }
        let _ = target.send_message(ChatMessage::system(format!(
            "--- End of history ({} messages) ---",
            count
        )));
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
