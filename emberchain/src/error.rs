use std::time::Duration;

use thiserror::Error;

pub type ChainResult<T> = std::result::Result<T, ChainError>;

/// Failure kinds surfaced by pipelines, tools and agents.
///
/// Each variant is reported distinctly so the UI boundary can decide how to render it.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Missing configuration: {0}")]
    ConfigurationMissing(String),

    #[error("Model backend unavailable")]
    ModelUnavailable(#[source] anyhow::Error),

    #[error("Model did not respond within {0:?}")]
    ModelTimeout(Duration),

    #[error("{0}")]
    Parse(String),

    #[error("{kind} not found: {id}")]
    ResourceNotFound { kind: &'static str, id: String },

    #[error("Template fields missing {0:?}")]
    TemplateFieldMissing(Vec<String>),

    #[error("{0}")]
    Security(String),

    #[error("Agent stopped after {0} iterations without a final answer")]
    IterationBudget(usize),

    #[error("Vector index failure")]
    Index(#[source] anyhow::Error),
}

impl ChainError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn unavailable(err: impl Into<anyhow::Error>) -> Self {
        Self::ModelUnavailable(err.into())
    }

    /// Input problems the user can fix themselves.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::TemplateFieldMissing(_) | Self::Security(_)
        )
    }

    /// Renders the error for display, prefixed with a warning or error marker.
    pub fn display_marker(&self) -> String {
        if self.is_user_error() {
            format!("⚠️ {self}")
        } else {
            match self {
                Self::ModelUnavailable(source) | Self::Index(source) => {
                    format!("❌ 系統錯誤：{self} ({source:#})")
                }
                _ => format!("❌ 系統錯誤：{self}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[test]
    fn user_errors_get_warning_marker() {
        let err = ChainError::Parse("請輸入您的問題".into());
        assert_that!(err.display_marker(), eq("⚠️ 請輸入您的問題"));
    }

    #[test]
    fn backend_errors_include_source() {
        let err = ChainError::unavailable(anyhow::anyhow!("connection refused"));
        assert_that!(err.display_marker(), starts_with("❌ 系統錯誤："));
        assert_that!(err.display_marker(), contains_substring("connection refused"));
    }

    #[test]
    fn timeout_reports_duration() {
        let err = ChainError::ModelTimeout(Duration::from_secs(60));
        assert_that!(err.to_string(), contains_substring("60s"));
    }
}
