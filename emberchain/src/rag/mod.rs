//! Document loading, chunking, indexing and retrieval for question answering.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::config::Config;

pub mod loader;
pub mod qa;
pub mod retriever;
pub mod splitter;
pub mod store;

pub use loader::load_dir;
pub use qa::{Answer, RagQa, SourcePreview};
pub use retriever::{Retrieve, ScoredDocument, SearchKind, SearchOptions};
pub use splitter::Splitter;
pub use store::{IndexStatus, VectorIndex};

/// A piece of text and where it came from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn source_name(&self) -> &str {
        self.metadata
            .get("source_name")
            .map(String::as_str)
            .unwrap_or("未知來源")
    }
}

/// Connects to the index and builds it from `docs_dir` unless it already exists.
///
/// With `rebuild` set the existing collection is dropped first.
pub async fn prepare_index(config: &Config) -> anyhow::Result<(Arc<VectorIndex>, IndexStatus)> {
    let index = VectorIndex::connect(config)?;
    let splitter = Splitter::character(
        config.chunk_size.unwrap_or(1000),
        config.chunk_overlap.unwrap_or(100),
    );
    let docs_dir = config.required("docs_dir", &config.docs_dir)?.clone();
    let load = || load_dir(&docs_dir, "txt");

    let status = if config.rebuild.unwrap_or_default() {
        index.rebuild(load, &splitter).await?
    } else {
        index.open_or_build(load, &splitter).await?
    };

    Ok((Arc::new(index), status))
}
