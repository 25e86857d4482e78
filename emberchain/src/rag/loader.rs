use std::path::Path;

use itertools::Itertools;
use log::{info, warn};

use super::Document;
use crate::error::{ChainError, ChainResult};

/// Reads every file in `dir` with the given extension, in path order.
///
/// Unreadable files are skipped with a warning so one bad file does not sink the batch.
pub fn load_dir(dir: &Path, extension: &str) -> ChainResult<Vec<Document>> {
    if !dir.is_dir() {
        return Err(ChainError::ConfigurationMissing(format!(
            "document directory {}",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| ChainError::ConfigurationMissing(format!("{}: {e}", dir.display())))?;

    let paths = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == extension))
        .sorted()
        .collect_vec();

    let mut docs = vec![];
    for path in paths {
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let filename = path
                    .file_name()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();

                info!("Loaded {}", path.display());
                docs.push(
                    Document::new(content)
                        .with_meta("source", path.to_string_lossy())
                        .with_meta("source_name", stem)
                        .with_meta("filename", filename),
                );
            }
            Err(err) => warn!("Unable to read {}: {err}", path.display()),
        }
    }

    if docs.is_empty() {
        return Err(ChainError::not_found("documents", dir.display().to_string()));
    }

    Ok(docs)
}
