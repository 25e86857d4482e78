use std::collections::VecDeque;

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};

use super::Document;
use crate::error::{ChainError, ChainResult};

/// Ways of cutting documents into chunks. Sizes count characters except for `Token`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Splitter {
    /// Split on one separator, then pack pieces up to `chunk_size`
    Character {
        chunk_size: usize,
        chunk_overlap: usize,
        separator: String,
    },
    /// Try paragraph, line, sentence and word breaks in turn before falling back to characters
    Recursive {
        chunk_size: usize,
        chunk_overlap: usize,
    },
    /// Fixed windows of cl100k tokens
    Token {
        chunk_size: usize,
        chunk_overlap: usize,
    },
    /// Whole sentences packed up to `chunk_size`
    Sentence { chunk_size: usize },
    /// One chunk per blank-line separated paragraph
    Paragraph,
}

const RECURSIVE_SEPARATORS: [&str; 5] = ["\n\n", "\n", "。", " ", ""];
const SENTENCE_ENDINGS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl Splitter {
    pub fn character(chunk_size: usize, chunk_overlap: usize) -> Self {
        Splitter::Character {
            chunk_size,
            chunk_overlap,
            separator: "\n".into(),
        }
    }

    pub fn validate(&self) -> ChainResult<()> {
        let (size, overlap) = match self {
            Splitter::Character {
                chunk_size,
                chunk_overlap,
                ..
            }
            | Splitter::Recursive {
                chunk_size,
                chunk_overlap,
            }
            | Splitter::Token {
                chunk_size,
                chunk_overlap,
            } => (*chunk_size, *chunk_overlap),
            Splitter::Sentence { chunk_size } => (*chunk_size, 0),
            Splitter::Paragraph => return Ok(()),
        };

        if size == 0 || overlap >= size {
            return Err(ChainError::ConfigurationMissing(format!(
                "chunk_overlap ({overlap}) smaller than a non-zero chunk_size ({size})"
            )));
        }
        Ok(())
    }

    pub fn split_text(&self, text: &str) -> ChainResult<Vec<String>> {
        self.validate()?;

        let chunks = match self {
            Splitter::Character {
                chunk_size,
                chunk_overlap,
                separator,
            } => {
                let splits = if separator.is_empty() {
                    text.chars().map(String::from).collect_vec()
                } else {
                    text.split(separator.as_str())
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect_vec()
                };
                merge_splits(&splits, separator, *chunk_size, *chunk_overlap)
            }
            Splitter::Recursive {
                chunk_size,
                chunk_overlap,
            } => recursive_split(text, &RECURSIVE_SEPARATORS, *chunk_size, *chunk_overlap),
            Splitter::Token {
                chunk_size,
                chunk_overlap,
            } => token_split(text, *chunk_size, *chunk_overlap)?,
            Splitter::Sentence { chunk_size } => {
                merge_splits(&sentences(text), "", *chunk_size, 0)
            }
            Splitter::Paragraph => text
                .split("\n\n")
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect(),
        };

        Ok(chunks)
    }

    /// Splits each document, copying its metadata and numbering the chunks.
    pub fn split_documents(&self, docs: &[Document]) -> ChainResult<Vec<Document>> {
        let mut out = vec![];
        for doc in docs {
            for (i, content) in self.split_text(&doc.content)?.into_iter().enumerate() {
                out.push(Document {
                    content,
                    metadata: doc.metadata.clone(),
                }
                .with_meta("chunk", i.to_string()));
            }
        }
        Ok(out)
    }
}

/// Greedily packs `splits` joined by `separator`, carrying up to `overlap` characters
/// of trailing pieces into the next chunk.
fn merge_splits(splits: &[String], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = vec![];
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0;

    let emit = |current: &VecDeque<&str>, chunks: &mut Vec<String>| {
        let joined = current.iter().join(separator);
        let trimmed = joined.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
    };

    for split in splits {
        let len = char_len(split);
        let joiner = if current.is_empty() { 0 } else { sep_len };

        if total + len + joiner > chunk_size {
            if total > chunk_size {
                warn!("Created a chunk of size {total}, which is longer than the specified {chunk_size}");
            }
            if !current.is_empty() {
                emit(&current, &mut chunks);

                loop {
                    let joiner = if current.is_empty() { 0 } else { sep_len };
                    let overflows = total > 0 && total + len + joiner > chunk_size;
                    if total <= overlap && !overflows {
                        break;
                    }
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    let joiner = if current.is_empty() { 0 } else { sep_len };
                    total -= char_len(front) + joiner;
                }
            }
        }

        let joiner = if current.is_empty() { 0 } else { sep_len };
        current.push_back(split);
        total += len + joiner;
    }

    if !current.is_empty() {
        emit(&current, &mut chunks);
    }

    chunks
}

fn recursive_split(text: &str, separators: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let (idx, separator) = separators
        .iter()
        .find_position(|sep| sep.is_empty() || text.contains(**sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len().saturating_sub(1), ""));
    let remaining = &separators[(idx + 1).min(separators.len())..];

    let splits = if separator.is_empty() {
        text.chars().map(String::from).collect_vec()
    } else {
        text.split(separator)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect_vec()
    };

    let mut chunks = vec![];
    let mut good: Vec<String> = vec![];
    for split in splits {
        if char_len(&split) < chunk_size {
            good.push(split);
            continue;
        }

        if !good.is_empty() {
            chunks.extend(merge_splits(&good, separator, chunk_size, overlap));
            good.clear();
        }

        if remaining.is_empty() {
            chunks.push(split);
        } else {
            chunks.extend(recursive_split(&split, remaining, chunk_size, overlap));
        }
    }

    if !good.is_empty() {
        chunks.extend(merge_splits(&good, separator, chunk_size, overlap));
    }

    chunks
}

fn token_split(text: &str, chunk_size: usize, overlap: usize) -> ChainResult<Vec<String>> {
    let bpe = tiktoken_rs::cl100k_base()
        .map_err(|e| ChainError::ConfigurationMissing(format!("cl100k tokenizer: {e}")))?;
    let tokens = bpe.encode_with_special_tokens(text);

    let mut chunks = vec![];
    let mut start = 0;
    while start < tokens.len() {
        let end = (start + chunk_size).min(tokens.len());
        let piece = bpe
            .decode(tokens[start..end].to_vec())
            .map_err(|e| ChainError::Parse(format!("Could not decode tokens: {e}")))?;
        chunks.push(piece);
        if end == tokens.len() {
            break;
        }
        start += chunk_size - overlap;
    }

    Ok(chunks)
}

/// Sentences with their terminator attached. Trailing text without one is kept.
fn sentences(text: &str) -> Vec<String> {
    let mut out = vec![];
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if SENTENCE_ENDINGS.contains(&ch) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}
