//! String in, string out tools shared by the agents.
//!
//! Every tool implements [`TextTool`]. The registry keeps them addressable by name for direct
//! calls and installs them on rig agent builders through [`RigTool`].

use std::{collections::BTreeMap, sync::Arc};

use log::{debug, warn};
use rig::{agent::AgentBuilder, completion::ToolDefinition, providers::ollama};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ChainError, ChainResult};

pub mod files;
pub mod research;
pub mod shop;
pub mod sql;
pub mod utility;

pub use files::{ReadFile, Sandbox, WriteFile};
pub use research::{AnalyzeData, FormatReport, SearchInformation};
pub use shop::{CheckInventory, ListProducts, QueryOrder, SearchFaq};
pub use sql::{DemoDatabase, QueryDatabase, validate_select};
pub use utility::{Calculator, ConvertCurrency, CurrentTime, GetWeather, TranslateText};

pub type AgentBuilderT = AgentBuilder<ollama::CompletionModel>;

/// A tool that takes a single line of text and answers with text.
pub trait TextTool: Send + Sync + 'static {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    fn invoke(&self, input: &str) -> ChainResult<String>;
}

/// Object safe view of a [`TextTool`].
pub trait DynTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn call(&self, input: &str) -> ChainResult<String>;
}

impl<T: TextTool> DynTool for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn description(&self) -> &'static str {
        T::DESCRIPTION
    }

    fn call(&self, input: &str) -> ChainResult<String> {
        TextTool::invoke(self, input)
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ToolInput {
    /// Text handed to the tool, formatted as its description asks
    #[serde(default)]
    pub input: String,
}

/// Exposes a [`TextTool`] to rig agents.
///
/// Failures become observation text so the model can correct itself on the next turn.
pub struct RigTool<T>(pub Arc<T>);

impl<T: TextTool> rig::tool::Tool for RigTool<T> {
    const NAME: &'static str = T::NAME;

    type Error = std::convert::Infallible;

    type Args = ToolInput;

    type Output = String;

    async fn definition(&self, _prompt: String) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: T::DESCRIPTION.to_string(),
            parameters: serde_json::to_value(schemars::schema_for!(ToolInput))
                .unwrap_or_default(),
        }
    }

    async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
        debug!("Tool {} called with {:?}", T::NAME, args.input);
        Ok(match self.0.invoke(&args.input) {
            Ok(output) => output,
            Err(err) => {
                warn!("Tool {} failed: {err}", T::NAME);
                err.display_marker()
            }
        })
    }
}

type Installer = Box<dyn Fn(AgentBuilderT) -> AgentBuilderT + Send + Sync>;

struct Entry {
    tool: Arc<dyn DynTool>,
    install: Installer,
}

/// Tools by name.
#[derive(Default)]
pub struct ToolRegistry {
    entries: BTreeMap<&'static str, Entry>,
}

impl ToolRegistry {
    pub fn with<T: TextTool>(mut self, tool: T) -> Self {
        self.register(tool);
        self
    }

    /// Adds `tool`, replacing any tool of the same name.
    pub fn register<T: TextTool>(&mut self, tool: T) -> &mut Self {
        let tool = Arc::new(tool);
        let install = {
            let tool = tool.clone();
            Box::new(move |agent: AgentBuilderT| agent.tool(RigTool(tool.clone()))) as Installer
        };
        self.entries.insert(T::NAME, Entry { tool, install });
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> ChainResult<Arc<dyn DynTool>> {
        self.entries
            .get(name)
            .map(|e| e.tool.clone())
            .ok_or_else(|| ChainError::not_found("tool", name))
    }

    pub fn call(&self, name: &str, input: &str) -> ChainResult<String> {
        self.get(name)?.call(input)
    }

    /// One line per tool, for prompts and help text.
    pub fn describe(&self) -> String {
        self.entries
            .values()
            .map(|e| format!("- {}: {}", e.tool.name(), e.tool.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Installs every registered tool on the agent.
    pub fn apply(&self, agent: AgentBuilderT) -> AgentBuilderT {
        self.entries
            .values()
            .fold(agent, |agent, entry| (entry.install)(agent))
    }
}

/// Order, inventory and FAQ lookups for the shop assistant.
pub fn shop_tools() -> ToolRegistry {
    ToolRegistry::default()
        .with(QueryOrder)
        .with(CheckInventory)
        .with(SearchFaq)
        .with(ListProducts)
}

/// Everyday helpers plus sandboxed file access and the read-only product database.
pub fn utility_tools(sandbox: Sandbox, database: DemoDatabase) -> ToolRegistry {
    ToolRegistry::default()
        .with(CurrentTime)
        .with(Calculator)
        .with(GetWeather)
        .with(ConvertCurrency)
        .with(TranslateText)
        .with(ReadFile(sandbox.clone()))
        .with(WriteFile(sandbox))
        .with(QueryDatabase(database))
}

/// Groups the integer part with commas, e.g. `35,000`.
pub(crate) fn thousands(value: f64, decimals: usize) -> String {
    let text = format!("{:.*}", decimals, value.abs());
    let (int, frac) = match text.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (text.as_str(), None),
    };

    let mut grouped = String::new();
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    match frac {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}
