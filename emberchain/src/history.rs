use serde::{Deserialize, Serialize};

use crate::{
    error::ChainResult,
    model::{ChatMessage, ChatModel, Role},
};

/// Conversation owned by whoever drives the session. Nothing here outlives the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system(&self) -> Option<&ChatMessage> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    /// Sends `input` with the whole conversation and records both turns.
    ///
    /// A failed call leaves the session exactly as it was.
    pub async fn ask(&mut self, model: &dyn ChatModel, input: &str) -> ChainResult<String> {
        self.messages.push(ChatMessage::user(input));

        match model.invoke(&self.messages).await {
            Ok(reply) => {
                let text = reply.into_text();
                self.messages.push(ChatMessage::assistant(&text));
                Ok(text)
            }
            Err(err) => {
                self.messages.pop();
                Err(err)
            }
        }
    }

    /// Forgets the turns but keeps the system prompt.
    pub fn clear(&mut self) {
        let keep = usize::from(self.system().is_some());
        self.messages.truncate(keep);
    }

    /// The system prompt plus the most recent `n` turns.
    pub fn window(&self, n: usize) -> Vec<ChatMessage> {
        let (head, turns) = match self.system() {
            Some(system) => (Some(system.clone()), &self.messages[1..]),
            None => (None, &self.messages[..]),
        };
        let start = turns.len().saturating_sub(n);
        head.into_iter().chain(turns[start..].iter().cloned()).collect()
    }
}
