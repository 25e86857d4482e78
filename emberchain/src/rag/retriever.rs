use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Document;
use crate::{
    config::{Config, SearchMode},
    error::ChainResult,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchKind {
    /// Top `k` by cosine similarity
    Similarity { k: usize },
    /// Fetch `fetch_k` candidates, then pick `k` balancing relevance against redundancy
    Mmr { k: usize, fetch_k: usize, lambda: f32 },
    /// Top `k` that also clear a minimum similarity
    Threshold { k: usize, score: f32 },
}

impl SearchKind {
    pub fn k(&self) -> usize {
        match self {
            SearchKind::Similarity { k }
            | SearchKind::Mmr { k, .. }
            | SearchKind::Threshold { k, .. } => *k,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchKind::Similarity { .. } => "相似度搜尋",
            SearchKind::Mmr { .. } => "最大邊際相關性 (MMR)",
            SearchKind::Threshold { .. } => "相似度門檻",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub kind: SearchKind,
    /// Only consider chunks whose `source_name` equals this
    pub source_name: Option<String>,
}

impl SearchOptions {
    pub fn similarity(k: usize) -> Self {
        Self {
            kind: SearchKind::Similarity { k },
            source_name: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let k = config.top_k.unwrap_or(3);
        let kind = match config.search_kind.unwrap_or(SearchMode::Similarity) {
            SearchMode::Similarity => SearchKind::Similarity { k },
            SearchMode::Mmr => SearchKind::Mmr {
                k,
                fetch_k: 20,
                lambda: 0.5,
            },
            SearchMode::Threshold => SearchKind::Threshold {
                k,
                score: config.score_threshold.unwrap_or(0.1),
            },
        };
        Self {
            kind,
            source_name: None,
        }
    }

    pub fn with_source(self, source_name: Option<String>) -> Self {
        Self {
            source_name,
            ..self
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

#[async_trait]
pub trait Retrieve: Send + Sync {
    async fn retrieve(&self, query: &str, options: &SearchOptions) -> ChainResult<Vec<ScoredDocument>>;
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Maximal marginal relevance. Returns indices into `candidates` in pick order.
///
/// `lambda` of 1 is pure relevance, 0 is pure diversity.
pub fn mmr_select(query: &[f32], candidates: &[Vec<f32>], k: usize, lambda: f32) -> Vec<usize> {
    let relevance: Vec<f32> = candidates.iter().map(|c| cosine(query, c)).collect();
    let mut selected: Vec<usize> = vec![];
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let (pos, _) = remaining
            .iter()
            .enumerate()
            .map(|(pos, &idx)| {
                let redundancy = selected
                    .iter()
                    .map(|&s| cosine(&candidates[idx], &candidates[s]))
                    .fold(f32::MIN, f32::max);
                let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
                (pos, lambda * relevance[idx] - (1.0 - lambda) * redundancy)
            })
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        selected.push(remaining.remove(pos));
    }

    selected
}
