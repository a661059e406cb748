use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation. `created_order` is the zero-based position
/// within its conversation and is assigned when the message is appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub text: String,
    pub created_order: u64,
}

impl Message {
    pub fn new(conversation_id: &str, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            text: text.into(),
            created_order: 0,
        }
    }

    pub fn user(conversation_id: &str, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, text)
    }

    pub fn assistant(conversation_id: &str, text: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, text)
    }
}
