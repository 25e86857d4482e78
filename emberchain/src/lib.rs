pub mod agent;
pub mod chain;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod rag;
pub mod report;
pub mod template;
pub mod tools;
pub mod workflow;

pub use agent::{AgentBudget, AgentExecutor, ChatAgent, DynAgent};
pub use config::*;
pub use error::{ChainError, ChainResult};
pub use model::{ChatMessage, ChatModel, ModelReply, Role};

/// Logs a long prompt or reply with a marker on its first line and continuation markers after.
pub fn log_block(label: &str, body: &str) {
    let options = textwrap::Options::new(100)
        .initial_indent(">>> ")
        .subsequent_indent("... ");
    log::debug!("{label}\n{}", textwrap::fill(body, &options));
}
