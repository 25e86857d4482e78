use std::sync::Mutex;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, ModelInfo, TextEmbedding};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::info;
use qdrant_client::{
    Payload, Qdrant,
    qdrant::{
        Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, Distance,
        FieldType, Filter, PointStruct, QueryPointsBuilder, UpsertPointsBuilder,
        VectorParamsBuilder,
    },
};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{
    Document, Splitter,
    retriever::{Retrieve, ScoredDocument, SearchKind, SearchOptions, mmr_select},
};
use crate::{
    config::Config,
    error::{ChainError, ChainResult},
};

const EMBED_BATCH: usize = 32;

pub fn get_embed_info(model_name: &str) -> Option<ModelInfo<EmbeddingModel>> {
    let model_name = model_name.to_lowercase();
    TextEmbedding::list_supported_models()
        .into_iter()
        .find(|model| {
            model.model_code.to_lowercase().ends_with(&model_name)
                || format!("{:?}", model.model)
                    .to_lowercase()
                    .ends_with(&model_name)
        })
}

/// Outcome of [`VectorIndex::open_or_build`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexStatus {
    Reused,
    Built { documents: usize, chunks: usize },
}

/// Chunks embedded locally and stored in a qdrant collection.
#[derive(TypedBuilder)]
pub struct VectorIndex {
    client: Qdrant,
    embedder: Mutex<TextEmbedding>,
    #[builder(setter(into))]
    collection: String,
    dims: u64,
    #[builder(default)]
    progress: bool,
}

fn index_err(err: impl Into<anyhow::Error>) -> ChainError {
    ChainError::Index(err.into())
}

/// Stable id so re-indexing the same chunk overwrites instead of duplicating.
fn chunk_id(doc: &Document) -> anyhow::Result<Uuid> {
    let mut hasher = blake3::Hasher::new();
    for (k, v) in &doc.metadata {
        hasher.update(k.as_bytes());
        hasher.update(v.as_bytes());
    }
    hasher.update(doc.content.as_bytes());
    let hash = hasher.finalize();
    Ok(Uuid::new_v8(hash.as_bytes()[..16].try_into()?))
}

impl VectorIndex {
    pub fn connect(config: &Config) -> anyhow::Result<Self> {
        let model_name = config.required("embed_model", &config.embed_model)?;
        let info = get_embed_info(model_name)
            .ok_or_else(|| ChainError::ConfigurationMissing(format!("embedding model {model_name}")))?;

        let mut options = InitOptions::new(info.model.clone()).with_show_download_progress(true);
        if let Some(cache) = &config.fastembed_cache {
            options = options.with_cache_dir(cache.clone());
        }
        let embedder = TextEmbedding::try_new(options)?;

        let url = config.required("qdrant_url", &config.qdrant_url)?;
        let client = Qdrant::from_url(url).build()?;

        Ok(Self::builder()
            .client(client)
            .embedder(Mutex::new(embedder))
            .collection(config.required("collection", &config.collection)?.clone())
            .dims(info.dim as u64)
            .progress(config.progress.unwrap_or_default())
            .build())
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn embed(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut embedder = self
            .embedder
            .lock()
            .map_err(|_| anyhow!("Embedding model lock poisoned"))?;
        Ok(embedder.embed(texts, None)?)
    }

    pub async fn exists(&self) -> ChainResult<bool> {
        self.client
            .collection_exists(&self.collection)
            .await
            .map_err(index_err)
    }

    /// Reuses the collection when it is already there, otherwise loads, splits and indexes.
    ///
    /// `load` only runs when a build is needed.
    pub async fn open_or_build<F>(&self, load: F, splitter: &Splitter) -> ChainResult<IndexStatus>
    where
        F: FnOnce() -> ChainResult<Vec<Document>>,
    {
        if self.exists().await? {
            info!("Reusing existing collection {}", self.collection);
            return Ok(IndexStatus::Reused);
        }

        info!("Building collection {}", self.collection);
        let docs = load()?;
        let chunks = splitter.split_documents(&docs)?;
        info!("Split {} documents into {} chunks", docs.len(), chunks.len());

        self.create().await?;
        self.insert(&chunks).await?;

        Ok(IndexStatus::Built {
            documents: docs.len(),
            chunks: chunks.len(),
        })
    }

    pub async fn rebuild<F>(&self, load: F, splitter: &Splitter) -> ChainResult<IndexStatus>
    where
        F: FnOnce() -> ChainResult<Vec<Document>>,
    {
        if self.exists().await? {
            info!("Dropping collection {}", self.collection);
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(index_err)?;
        }
        self.open_or_build(load, splitter).await
    }

    async fn create(&self) -> ChainResult<()> {
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(VectorParamsBuilder::new(self.dims, Distance::Cosine)),
            )
            .await
            .map_err(index_err)?;

        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                "source_name",
                FieldType::Keyword,
            ))
            .await
            .map_err(index_err)?;

        Ok(())
    }

    pub async fn insert(&self, chunks: &[Document]) -> ChainResult<()> {
        let bar = self.progress.then(|| {
            let bar = ProgressBar::new(chunks.len() as u64);
            if let Ok(style) = ProgressStyle::with_template(
                "[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}",
            ) {
                bar.set_style(style);
            }
            bar.set_message("embedding");
            bar
        });

        for batch in chunks.chunks(EMBED_BATCH) {
            let result = async {
                let texts = batch.iter().map(|d| d.content.clone()).collect_vec();
                let embeddings = self.embed(texts)?;

                let points = batch
                    .iter()
                    .zip(embeddings)
                    .map(|(doc, embedding)| {
                        let mut value = serde_json::to_value(&doc.metadata)?;
                        value["content"] = doc.content.clone().into();
                        let payload = Payload::try_from(value)?;
                        Ok(PointStruct::new(chunk_id(doc)?.to_string(), embedding, payload))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()?;

                self.client
                    .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
                    .await
                    .context("Unable to upsert points")?;

                Ok::<_, anyhow::Error>(())
            }
            .await;

            result.map_err(index_err)?;
            if let Some(bar) = &bar {
                bar.inc(batch.len() as u64);
            }
        }

        if let Some(bar) = bar {
            bar.finish_with_message("indexed");
        }

        Ok(())
    }

    async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        options: &SearchOptions,
        threshold: Option<f32>,
    ) -> ChainResult<Vec<ScoredDocument>> {
        let mut query = QueryPointsBuilder::new(&self.collection)
            .query(vector)
            .with_payload(true)
            .limit(limit as u64);

        if let Some(source_name) = &options.source_name {
            query = query.filter(Filter::must([Condition::matches(
                "source_name",
                source_name.clone(),
            )]));
        }

        if let Some(score) = threshold {
            query = query.score_threshold(score);
        }

        let resp = self.client.query(query).await.map_err(index_err)?;

        resp.result
            .into_iter()
            .map(|point| {
                let payload = serde_json::to_value(&point.payload).map_err(index_err)?;
                Ok(ScoredDocument {
                    document: payload_to_document(payload),
                    score: point.score,
                })
            })
            .collect()
    }
}

fn payload_to_document(payload: serde_json::Value) -> Document {
    let serde_json::Value::Object(fields) = payload else {
        return Document::default();
    };

    let mut doc = Document::default();
    for (key, value) in fields {
        let text = match value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        if key == "content" {
            doc.content = text;
        } else {
            doc.metadata.insert(key, text);
        }
    }
    doc
}

#[async_trait]
impl Retrieve for VectorIndex {
    async fn retrieve(&self, query: &str, options: &SearchOptions) -> ChainResult<Vec<ScoredDocument>> {
        let vector = self
            .embed(vec![query.to_string()])
            .map_err(index_err)?
            .pop()
            .ok_or_else(|| index_err(anyhow!("No embedding returned for query")))?;

        match options.kind {
            SearchKind::Similarity { k } => self.search(vector, k, options, None).await,
            SearchKind::Threshold { k, score } => self.search(vector, k, options, Some(score)).await,
            SearchKind::Mmr { k, fetch_k, lambda } => {
                let candidates = self.search(vector.clone(), fetch_k, options, None).await?;
                if candidates.is_empty() {
                    return Ok(candidates);
                }

                let texts = candidates
                    .iter()
                    .map(|c| c.document.content.clone())
                    .collect_vec();
                let vectors = self.embed(texts).map_err(index_err)?;
                let picks = mmr_select(&vector, &vectors, k, lambda);

                let mut candidates = candidates.into_iter().map(Some).collect_vec();
                Ok(picks
                    .into_iter()
                    .filter_map(|i| candidates[i].take())
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;
    use serde_json::json;

    #[test]
    fn payload_round_trips_into_document() {
        let doc = payload_to_document(json!({
            "content": "按下電源鍵三秒開機",
            "source_name": "智慧型手機使用手冊",
            "chunk": "0",
        }));
        assert_that!(doc.content, eq("按下電源鍵三秒開機"));
        assert_that!(doc.source_name(), eq("智慧型手機使用手冊"));
    }

    #[test]
    fn chunk_ids_are_stable() -> anyhow::Result<()> {
        let doc = Document::new("內容").with_meta("source_name", "手冊");
        assert_that!(chunk_id(&doc)?, eq(chunk_id(&doc.clone())?));
        let other = Document::new("內容").with_meta("source_name", "另一本");
        assert_that!(chunk_id(&doc)?, not(eq(chunk_id(&other)?)));
        Ok(())
    }

    #[test]
    fn multilingual_model_is_supported() {
        let info = get_embed_info("multilingual-e5-small");
        assert_that!(info.map(|i| i.dim), some(eq(384)));
    }
}
