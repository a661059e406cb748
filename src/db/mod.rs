pub mod models;

use models::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type History = Arc<Mutex<Vec<Message>>>;

/// In-memory conversation history, keyed by caller-supplied conversation id.
///
/// The outer map is only write-locked to create a missing entry; appends take
/// the per-conversation mutex, so distinct conversations never contend.
/// Entries live for the lifetime of the process.
#[derive(Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, History>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn history(&self, conversation_id: &str) -> History {
        {
            let map = self
                .conversations
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(history) = map.get(conversation_id) {
                return Arc::clone(history);
            }
        }
        let mut map = self
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(conversation_id.to_string()).or_default())
    }

    // ── Messages ──

    /// Snapshot of a conversation; unknown ids yield an empty history.
    pub fn get_messages(&self, conversation_id: &str) -> Vec<Message> {
        let history = self.history(conversation_id);
        let messages = history.lock().unwrap_or_else(PoisonError::into_inner);
        messages.clone()
    }

    pub fn add_message(&self, conversation_id: &str, message: Message) -> Message {
        let history = self.history(conversation_id);
        let mut messages = history.lock().unwrap_or_else(PoisonError::into_inner);
        push(&mut messages, conversation_id, message)
    }

    /// Append the user turn then the assistant turn, adjacent and in that
    /// order, so concurrent exchanges on one conversation never interleave.
    pub fn add_exchange(
        &self,
        conversation_id: &str,
        user: Message,
        assistant: Message,
    ) -> (Message, Message) {
        let history = self.history(conversation_id);
        let mut messages = history.lock().unwrap_or_else(PoisonError::into_inner);
        let user = push(&mut messages, conversation_id, user);
        let assistant = push(&mut messages, conversation_id, assistant);
        (user, assistant)
    }

    #[cfg(test)]
    pub(crate) fn conversation_count(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn push(messages: &mut Vec<Message>, conversation_id: &str, mut message: Message) -> Message {
    message.conversation_id = conversation_id.to_string();
    message.created_order = messages.len() as u64;
    messages.push(message.clone());
    message
}
