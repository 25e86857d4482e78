use std::{path::PathBuf, time::Duration};

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use humantime::parse_duration;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::ChainError;

/// Demonstrations of prompt chains, retrieval and tool-using agents on a local model server.
#[skip_serializing_none] // Unset fields must not mask lower layers
#[derive(Clone, Parser, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Print the effective configuration and exit
    #[arg(long, action=clap::ArgAction::SetTrue)]
    pub dump_config: Option<bool>,

    /// Display progress bars while indexing
    #[arg(long, action=clap::ArgAction::SetTrue)]
    pub progress: Option<bool>,

    /// Drop and rebuild the vector index even if it already exists
    #[arg(long, action=clap::ArgAction::SetTrue)]
    pub rebuild: Option<bool>,

    /// Base URL of the language model server
    #[arg(long)]
    pub llm_base_url: Option<String>,

    /// Name of the language model
    #[arg(long)]
    pub llm_model: Option<String>,

    /// Which client talks to the model server
    #[arg(long)]
    pub llm_backend: Option<Backend>,

    /// Upper bound on a single model call, e.g. "60s" or "2min"
    #[arg(long)]
    pub llm_timeout: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f64>,

    /// URL to the qdrant server instance
    #[arg(long)]
    pub qdrant_url: Option<String>,

    /// Name of collection in qdrant
    #[arg(long)]
    pub collection: Option<String>,

    /// The embedding model identifier (e.g. intfloat/multilingual-e5-small) or enum code
    #[arg(long)]
    pub embed_model: Option<String>,

    /// Path to local cache for storing embedding models
    #[arg(long)]
    pub fastembed_cache: Option<PathBuf>,

    /// Directory of plain text documents to index
    #[arg(long)]
    pub docs_dir: Option<PathBuf>,

    /// Maximum chunk length in characters
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Characters shared between neighbouring chunks
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Number of chunks handed to the model as context
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Retrieval strategy
    #[arg(long)]
    pub search_kind: Option<SearchMode>,

    /// Minimum similarity for the threshold strategy
    #[arg(long)]
    pub score_threshold: Option<f32>,

    /// Sandbox directory for the file tools
    #[arg(long)]
    pub workspace_dir: Option<PathBuf>,

    /// SQLite file backing the demo product table
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Reasoning steps an agent may take before giving up
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Wall clock budget for one agent run, e.g. "60s"
    #[arg(long)]
    pub max_execution_time: Option<String>,

    /// Which demo to run
    #[arg(value_enum)]
    pub task: Option<Task>,

    /// Input text for the task. Read from stdin when omitted.
    pub input: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// rig agent against the ollama provider
    Agent,
    /// Raw ollama chat endpoint, keeps token counts
    Http,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    Similarity,
    Mmr,
    Threshold,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    /// Keyword routed customer service reply
    Route,
    /// Parallel content analysis report
    Analyze,
    /// Render a library template from key=value lines
    Template,
    /// Interactive conversation with history
    Chat,
    /// Build or reuse the vector index
    Index,
    /// Answer a question from the indexed documents
    Ask,
    /// Follow up questions over the indexed documents, one per line
    Converse,
    /// Customer service agent with order and inventory tools
    Agent,
    /// General agent with weather, currency, file and SQL tools
    Tools,
    /// Research, analysis and writing pipeline
    Research,
    /// Run a read-only query against the demo database
    Sql,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dump_config: Default::default(),
            progress: Default::default(),
            rebuild: Default::default(),
            llm_base_url: Some("http://localhost:11434".into()),
            llm_model: Some("llama3.2:latest".into()),
            llm_backend: Some(Backend::Agent),
            llm_timeout: Some("60s".into()),
            temperature: Some(0.7),
            qdrant_url: Some("http://localhost:6334".into()),
            collection: Some("emberchain".into()),
            embed_model: Some("multilingual-e5-small".into()),
            fastembed_cache: dirs::cache_dir().map(|d| d.join("fastembed")),
            docs_dir: Some("./docs".into()),
            chunk_size: Some(1000),
            chunk_overlap: Some(100),
            top_k: Some(3),
            search_kind: Some(SearchMode::Similarity),
            score_threshold: Some(0.1),
            workspace_dir: Some("./workspace".into()),
            database: Some("demo.db".into()),
            max_iterations: Some(10),
            max_execution_time: Some("60s".into()),
            task: None,
            input: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::figment(Config::parse())
    }

    /// Layers defaults, the user config file, `EMBER_` environment variables and finally `cli`.
    pub fn figment(cli: Config) -> Result<Self> {
        Ok(Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(
                dirs::config_dir()
                    .map(|p| p.join("emberchain"))
                    .unwrap_or_default()
                    .join("config.toml"),
            ))
            .merge(Env::prefixed("EMBER_"))
            .merge(Serialized::defaults(cli))
            .select(std::env::var("EMBER_PROFILE").unwrap_or_default())
            .extract()?)
    }

    pub fn base_url(&self) -> Result<&str, ChainError> {
        self.llm_base_url
            .as_deref()
            .ok_or_else(|| ChainError::ConfigurationMissing("llm_base_url".into()))
    }

    pub fn model_name(&self) -> Result<&str, ChainError> {
        self.llm_model
            .as_deref()
            .ok_or_else(|| ChainError::ConfigurationMissing("llm_model".into()))
    }

    pub fn llm_timeout(&self) -> Result<Duration> {
        duration_setting("llm_timeout", self.llm_timeout.as_deref())
    }

    pub fn max_execution_time(&self) -> Result<Duration> {
        duration_setting("max_execution_time", self.max_execution_time.as_deref())
    }

    pub fn required<'a, T>(&self, name: &str, value: &'a Option<T>) -> Result<&'a T, ChainError> {
        value
            .as_ref()
            .ok_or_else(|| ChainError::ConfigurationMissing(name.into()))
    }
}

fn duration_setting(name: &str, value: Option<&str>) -> Result<Duration> {
    let value = value.ok_or_else(|| ChainError::ConfigurationMissing(name.into()))?;
    parse_duration(value).with_context(|| {
        format!("Invalid {name} \"{value}\". See https://docs.rs/humantime/latest/humantime/fn.parse_duration.html")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[test]
    fn defaults_point_at_local_ollama() {
        let config = Config::default();
        assert_that!(config.base_url().ok(), some(eq("http://localhost:11434")));
        assert_that!(config.llm_timeout().ok(), some(eq(Duration::from_secs(60))));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let config = Config {
            max_execution_time: Some("forever".into()),
            ..Config::default()
        };
        assert_that!(config.max_execution_time().is_err(), eq(true));
    }

    #[test]
    fn cli_layer_overrides_defaults() -> anyhow::Result<()> {
        let cli = Config::parse_from(["emberchain", "--top-k", "5", "ask", "退貨政策"]);
        let config = Config::figment(cli)?;
        assert_that!(config.top_k, some(eq(5)));
        assert_that!(config.task, some(eq(Task::Ask)));
        assert_that!(config.chunk_size, some(eq(1000)));
        Ok(())
    }
}
