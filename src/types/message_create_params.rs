use serde::{Deserialize, Serialize};

use crate::types::MessageRole;

/// Body of `POST /sessions/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreateParams {
    /// Always `user`; the server writes assistant messages itself.
    pub role: MessageRole,

    /// The text the user typed.
    pub content: String,

    /// The checkpoint the user is working on.
    pub checkpoint_id: Option<String>,
}

impl MessageCreateParams {
    /// Create the parameters for a user message.
    pub fn new(content: impl Into<String>, checkpoint_id: Option<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            checkpoint_id,
        }
    }
}
