#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;

use emberchain::{
    ChainError, ChainResult, ChatMessage, ChatModel, DynAgent, ModelReply, Role,
    rag::{Document, Retrieve, ScoredDocument, SearchOptions},
};

/// Replies with the first line of the system prompt and the last user turn, and remembers every call.
#[derive(Default)]
pub struct EchoModel {
    pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    /// Fail any call whose messages mention this text
    pub fail_on: Option<String>,
}

impl EchoModel {
    pub fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.into()),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Vec<ChatMessage> {
        self.calls.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        self.calls.lock().unwrap().push(messages.to_vec());

        if let Some(needle) = &self.fail_on
            && messages.iter().any(|m| m.content.contains(needle.as_str()))
        {
            return Err(ChainError::unavailable(anyhow!("connection refused")));
        }

        let system = messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.lines().next())
            .unwrap_or_default();
        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        Ok(ModelReply::Text(format!("  [{system}] {user}  ")))
    }
}

/// Always unavailable.
pub struct DownModel;

#[async_trait]
impl ChatModel for DownModel {
    async fn invoke(&self, _messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        Err(ChainError::unavailable(anyhow!("connection refused")))
    }
}

/// Hands back a canned ranking, honouring only the `source_name` filter and `k`.
#[derive(Default)]
pub struct FixedRetriever {
    pub hits: Vec<ScoredDocument>,
    pub seen: Mutex<Vec<SearchOptions>>,
    pub queries: Mutex<Vec<String>>,
}

impl FixedRetriever {
    pub fn new(docs: &[(&str, &str, f32)]) -> Self {
        let hits = docs
            .iter()
            .map(|(source, content, score)| ScoredDocument {
                document: Document::new(*content).with_meta("source_name", *source),
                score: *score,
            })
            .collect();
        Self {
            hits,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Retrieve for FixedRetriever {
    async fn retrieve(&self, query: &str, options: &SearchOptions) -> ChainResult<Vec<ScoredDocument>> {
        self.seen.lock().unwrap().push(options.clone());
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self
            .hits
            .iter()
            .filter(|h| {
                options
                    .source_name
                    .as_deref()
                    .is_none_or(|name| h.document.source_name() == name)
            })
            .take(options.kind.k())
            .cloned()
            .collect())
    }
}

/// Every prompt seen by a group of agents, in call order, as `tag: body`.
pub type PromptLog = Arc<Mutex<Vec<String>>>;

/// Agent stand-in that tags its input, or fails when told to.
pub struct FakeAgent {
    pub tag: &'static str,
    pub fail: bool,
    pub log: PromptLog,
}

impl FakeAgent {
    pub fn new(tag: &'static str, log: &PromptLog) -> Self {
        Self {
            tag,
            fail: false,
            log: log.clone(),
        }
    }

    pub fn broken(tag: &'static str, log: &PromptLog) -> Self {
        Self {
            fail: true,
            ..Self::new(tag, log)
        }
    }
}

#[async_trait]
impl DynAgent for FakeAgent {
    async fn prompt(&self, body: &str) -> anyhow::Result<String> {
        self.log.lock().unwrap().push(format!("{}: {body}", self.tag));
        if self.fail {
            return Err(ChainError::IterationBudget(5).into());
        }
        Ok(format!("<{}>{}</{}>", self.tag, body.lines().next().unwrap_or_default(), self.tag))
    }
}
