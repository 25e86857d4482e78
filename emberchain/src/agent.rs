//! Tool using agents with an iteration and wall clock budget.

use std::{future::IntoFuture as _, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use indoc::indoc;
use log::{info, warn};
use rig::{
    agent::{Agent, PromptRequest},
    client::CompletionClient,
    completion::{Prompt, PromptError},
    message::Message,
    providers::ollama,
};

use crate::{
    config::Config,
    error::{ChainError, ChainResult},
    model::ChatMessage,
    tools::{DemoDatabase, Sandbox, ToolRegistry, shop_tools, utility_tools},
};

pub const SHOP_PREAMBLE: &str = indoc! {"
    你是一個專業且友善的客服助手。你可以幫助客戶：
    1. 查詢訂單狀態和物流資訊
    2. 檢查商品庫存和價格
    3. 回答常見問題（退貨、運送、付款等）
    4. 提供商品推薦

    請用親切、專業的態度回答客戶問題，並主動提供相關資訊。
"};

pub const UTILITY_PREAMBLE: &str = indoc! {"
    你是一個多功能助手，可以查詢天氣、轉換匯率、翻譯文字、讀寫檔案、查詢產品資料庫以及進行計算。
    請根據使用者的需求選擇合適的工具，並使用繁體中文回答。
"};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgentBudget {
    /// Model turns allowed before giving up
    pub max_iterations: usize,
    pub max_execution_time: Duration,
}

impl Default for AgentBudget {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_execution_time: Duration::from_secs(60),
        }
    }
}

impl AgentBudget {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            max_iterations: config.max_iterations.unwrap_or(10),
            max_execution_time: config.max_execution_time()?,
        })
    }

    pub fn with_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }
}

/// Maps how an agent run ended onto the error taxonomy. `None` means the deadline passed.
pub fn settle(budget: &AgentBudget, outcome: Option<Result<String, PromptError>>) -> ChainResult<String> {
    match outcome {
        None => Err(ChainError::ModelTimeout(budget.max_execution_time)),
        Some(Ok(answer)) => Ok(answer),
        Some(Err(PromptError::MaxDepthError { max_depth, .. })) => {
            Err(ChainError::IterationBudget(max_depth))
        }
        Some(Err(err)) => Err(ChainError::unavailable(err)),
    }
}

pub struct AgentExecutor {
    agent: Agent<ollama::CompletionModel>,
    budget: AgentBudget,
}

impl AgentExecutor {
    pub fn new(config: &Config, preamble: &str, tools: &ToolRegistry, budget: AgentBudget) -> Result<Self> {
        let builder = ollama::Client::from_url(config.base_url()?)
            .agent(config.model_name()?)
            .preamble(preamble)
            .temperature(config.temperature.unwrap_or(0.7))
            .max_tokens(1024);

        info!("Building agent with tools: {}", tools.names().collect::<Vec<_>>().join(", "));
        let agent = tools.apply(builder).build();

        Ok(Self { agent, budget })
    }

    pub fn budget(&self) -> &AgentBudget {
        &self.budget
    }

    /// Runs one user turn.
    ///
    /// Only the user input and the final answer are added to `history`; a failed run leaves it untouched.
    pub async fn run(&self, input: &str, history: &mut Vec<ChatMessage>) -> ChainResult<String> {
        if input.trim().is_empty() {
            return Err(ChainError::Parse("請輸入訊息".into()));
        }

        let mut turns: Vec<Message> = history.iter().filter_map(ChatMessage::as_turn).collect();
        let request = PromptRequest::new(&self.agent, input)
            .multi_turn(self.budget.max_iterations)
            .with_history(&mut turns);

        let outcome = tokio::time::timeout(self.budget.max_execution_time, request.into_future())
            .await
            .ok();

        let answer = settle(&self.budget, outcome).inspect_err(|err| warn!("Agent run failed: {err}"))?;

        history.push(ChatMessage::user(input));
        history.push(ChatMessage::assistant(&answer));
        Ok(answer)
    }
}

// Allows both static dispatch via generics or dynamic via boxing
#[async_trait]
pub trait DynAgent: Send + Sync {
    async fn prompt(&self, body: &str) -> Result<String>;
}

#[async_trait]
impl DynAgent for AgentExecutor {
    async fn prompt(&self, body: &str) -> Result<String> {
        Ok(self.run(body, &mut vec![]).await?)
    }
}

#[async_trait]
impl<M: rig::completion::CompletionModel> DynAgent for Agent<M> {
    async fn prompt(&self, body: &str) -> Result<String> {
        Ok(Prompt::prompt(self, body).await?)
    }
}

// The part that supports dynamic dispatch via unsized trait objects.
#[async_trait]
impl<T: DynAgent + ?Sized> DynAgent for Box<T> {
    async fn prompt(&self, body: &str) -> Result<String> {
        (**self).prompt(body).await
    }
}

/// An agent that continues a conversation held by the caller.
#[async_trait]
pub trait ChatAgent: Send + Sync {
    async fn reply(&self, input: &str, history: &mut Vec<ChatMessage>) -> ChainResult<String>;
}

#[async_trait]
impl ChatAgent for AgentExecutor {
    async fn reply(&self, input: &str, history: &mut Vec<ChatMessage>) -> ChainResult<String> {
        self.run(input, history).await
    }
}

/// Customer service agent over the order, inventory and FAQ tools.
pub fn shop_agent(config: &Config) -> Result<AgentExecutor> {
    AgentExecutor::new(config, SHOP_PREAMBLE, &shop_tools(), AgentBudget::from_config(config)?)
}

/// General purpose agent over weather, currency, translation, files, the demo database and arithmetic.
pub fn utility_agent(config: &Config) -> Result<AgentExecutor> {
    let sandbox = Sandbox::new(config.required("workspace_dir", &config.workspace_dir)?.clone());
    let database = DemoDatabase::new(config.required("database", &config.database)?.clone());
    database.seed()?;

    AgentExecutor::new(
        config,
        UTILITY_PREAMBLE,
        &utility_tools(sandbox, database),
        AgentBudget::from_config(config)?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use rig::completion::CompletionError;

    #[test]
    fn elapsed_deadline_is_a_timeout() {
        let budget = AgentBudget::default();
        assert_that!(
            settle(&budget, None),
            err(matches_pattern!(ChainError::ModelTimeout(eq(Duration::from_secs(60)))))
        );
    }

    #[test]
    fn provider_failure_is_unavailable() {
        let budget = AgentBudget::default();
        let outcome = Some(Err(PromptError::CompletionError(CompletionError::ProviderError(
            "connection refused".into(),
        ))));
        assert_that!(
            settle(&budget, outcome),
            err(matches_pattern!(ChainError::ModelUnavailable(anything())))
        );
    }

    #[test]
    fn final_answer_passes_through() -> anyhow::Result<()> {
        let answer = settle(&AgentBudget::default(), Some(Ok("ORD001 已出貨".into())))?;
        assert_that!(answer, eq("ORD001 已出貨"));
        Ok(())
    }
}
