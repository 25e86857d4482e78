#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use tower::ServiceExt as _;

use emberchain::{
    ChainError, ChainResult, ChatAgent, ChatMessage, ChatModel, ModelReply, Role,
    rag::{Document, Retrieve, ScoredDocument, SearchOptions},
};

/// Replies with the last user turn, or fails when any message mentions `fail_on`.
#[derive(Default)]
pub struct EchoModel {
    pub fail_on: Option<&'static str>,
}

#[async_trait]
impl ChatModel for EchoModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        if let Some(needle) = self.fail_on
            && messages.iter().any(|m| m.content.contains(needle))
        {
            return Err(ChainError::unavailable(anyhow!("connection refused")));
        }
        let user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ModelReply::Text(user))
    }
}

pub struct FixedRetriever(pub Vec<ScoredDocument>);

impl FixedRetriever {
    pub fn new(docs: &[(&str, &str)]) -> Self {
        Self(
            docs.iter()
                .map(|(source, content)| ScoredDocument {
                    document: Document::new(*content).with_meta("source_name", *source),
                    score: 0.8,
                })
                .collect(),
        )
    }
}

#[async_trait]
impl Retrieve for FixedRetriever {
    async fn retrieve(&self, _query: &str, options: &SearchOptions) -> ChainResult<Vec<ScoredDocument>> {
        Ok(self
            .0
            .iter()
            .filter(|h| {
                options
                    .source_name
                    .as_deref()
                    .is_none_or(|name| h.document.source_name() == name)
            })
            .cloned()
            .collect())
    }
}

/// Counts the turns it has seen and records the exchange like a real agent would.
pub struct CountingAgent;

#[async_trait]
impl ChatAgent for CountingAgent {
    async fn reply(&self, input: &str, history: &mut Vec<ChatMessage>) -> ChainResult<String> {
        if input.is_empty() {
            return Err(ChainError::Parse("請輸入訊息".into()));
        }
        let reply = format!("第 {} 則：{input}", history.len() / 2 + 1);
        history.push(ChatMessage::user(input));
        history.push(ChatMessage::assistant(&reply));
        Ok(reply)
    }
}

pub async fn get(app: Router, uri: &str) -> anyhow::Result<(StatusCode, String)> {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty())?)
        .await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, String::from_utf8(bytes.to_vec())?))
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> anyhow::Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?;

    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok((status, serde_json::from_slice(&bytes)?))
}
