//! Model clients behind a single chat interface.
//!
//! Two backends are supported: a rig agent talking to ollama, which only hands back text,
//! and the raw ollama chat endpoint, which also reports the model name and token counts.

use std::{future::IntoFuture as _, sync::Arc, time::Duration};

use anyhow::Context as _;
use async_trait::async_trait;
use itertools::Itertools;
use log::{debug, info};
use rig::{
    client::CompletionClient,
    completion::Chat,
    message::Message,
    providers::ollama,
};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    config::{Backend, Config},
    error::{ChainError, ChainResult},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// The rig form of a user or assistant turn. System and tool messages are never replayed as turns.
    pub fn as_turn(&self) -> Option<Message> {
        match self.role {
            Role::User => Some(Message::user(&self.content)),
            Role::Assistant => Some(Message::assistant(&self.content)),
            Role::System | Role::Tool => None,
        }
    }
}

/// What a model hands back. Completion style clients return bare text,
/// chat style clients return a message with metadata.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelReply {
    Text(String),
    Structured {
        content: String,
        model: Option<String>,
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
    },
}

impl ModelReply {
    pub fn text(&self) -> &str {
        match self {
            ModelReply::Text(text) => text,
            ModelReply::Structured { content, .. } => content,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ModelReply::Text(text) => text,
            ModelReply::Structured { content, .. } => content,
        }
    }
}

// Allows both static dispatch via generics or dynamic via boxing
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply>;
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Box<T> {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        (**self).invoke(messages).await
    }
}

#[async_trait]
impl<T: ChatModel + ?Sized> ChatModel for Arc<T> {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        (**self).invoke(messages).await
    }
}

/// Runs `fut` against the deadline, mapping elapsed time and transport failures onto the error taxonomy.
pub async fn bounded<T, E, F>(limit: Duration, fut: F) -> ChainResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<anyhow::Error>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ChainError::unavailable(err)),
        Err(_) => Err(ChainError::ModelTimeout(limit)),
    }
}

/// Splits a conversation into the system preamble, prior turns and the final prompt.
fn split_conversation(messages: &[ChatMessage]) -> ChainResult<(String, Vec<Message>, String)> {
    let preamble = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .join("\n\n");

    let turns = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .collect_vec();

    let Some((last, prior)) = turns.split_last() else {
        return Err(ChainError::Parse("No prompt to send to the model".into()));
    };

    Ok((
        preamble,
        prior.iter().filter_map(|m| m.as_turn()).collect(),
        last.content.clone(),
    ))
}

/// Chat through a rig agent. The ollama client and its connection pool are shared by every call.
#[derive(TypedBuilder, Clone)]
pub struct AgentModel {
    #[builder(setter(transform = |base_url: &str| ollama::Client::from_url(base_url)))]
    client: ollama::Client,

    #[builder(setter(into))]
    model: String,

    #[builder(default = 0.7)]
    temperature: f64,

    #[builder(default = Duration::from_secs(60))]
    timeout: Duration,
}

#[async_trait]
impl ChatModel for AgentModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        let (preamble, history, prompt) = split_conversation(messages)?;

        let agent = self
            .client
            .agent(&self.model)
            .preamble(&preamble)
            .temperature(self.temperature)
            .max_tokens(1024)
            .build();

        debug!("Prompting {} with {} prior turns", self.model, history.len());
        let text = bounded(self.timeout, agent.chat(prompt, history).into_future()).await?;
        Ok(ModelReply::Text(text))
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f64,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    model: Option<String>,
    message: ChatMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

/// Client for the `/api/chat` endpoint of an ollama server.
#[derive(TypedBuilder, Clone)]
pub struct OllamaChat {
    #[builder(setter(into))]
    base_url: String,

    #[builder(setter(into))]
    model: String,

    #[builder(default = 0.7)]
    temperature: f64,

    #[builder(default = Duration::from_secs(60))]
    timeout: Duration,

    #[builder(default)]
    client: reqwest::Client,
}

impl OllamaChat {
    async fn post(&self, messages: &[ChatMessage]) -> anyhow::Result<OllamaChatResponse> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let request = OllamaChatRequest {
            model: &self.model,
            messages,
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
            },
        };

        Ok(self
            .client
            .post(&endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Unable to reach {endpoint}"))?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    async fn invoke(&self, messages: &[ChatMessage]) -> ChainResult<ModelReply> {
        let resp = bounded(self.timeout, self.post(messages)).await?;

        Ok(ModelReply::Structured {
            content: resp.message.content,
            model: resp.model,
            prompt_tokens: resp.prompt_eval_count,
            completion_tokens: resp.eval_count,
        })
    }
}

/// Checks that the model server answers at all.
pub async fn check_backend(base_url: &str) -> ChainResult<()> {
    reqwest::get(base_url)
        .await
        .context("Unable to connect to LLM provider")
        .map_err(ChainError::ModelUnavailable)?
        .text()
        .await
        .map_err(ChainError::unavailable)?;
    Ok(())
}

pub fn build_model(config: &Config) -> anyhow::Result<Arc<dyn ChatModel>> {
    let base_url = config.base_url()?.to_string();
    let model = config.model_name()?.to_string();
    let temperature = config.temperature.unwrap_or(0.7);
    let timeout = config.llm_timeout()?;

    info!("Using {model} at {base_url}");

    Ok(match config.llm_backend.unwrap_or(Backend::Agent) {
        Backend::Agent => Arc::new(
            AgentModel::builder()
                .client(&base_url)
                .model(model)
                .temperature(temperature)
                .timeout(timeout)
                .build(),
        ),
        Backend::Http => Arc::new(
            OllamaChat::builder()
                .base_url(base_url)
                .model(model)
                .temperature(temperature)
                .timeout(timeout)
                .build(),
        ),
    })
}
