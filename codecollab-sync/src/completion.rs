//! Inline completion bridge.
//!
//! One request per trigger: the current buffer and caret offset go to a
//! [`SuggestionOracle`], and at most one suggestion comes back as ghost text
//! anchored at the caret. Oracle failures are swallowed here; the editing
//! surface only ever sees "a suggestion" or "nothing".

use std::sync::Arc;

use async_trait::async_trait;
use codecollab_core::Position;
use serde::Serialize;

use crate::api::ApiError;
use crate::surface::{InlineCompletion, Range};

/// Payload sent to the suggestion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub code: String,
    pub cursor_position: usize,
    pub language: String,
}

/// External source of code suggestions.
#[async_trait]
pub trait SuggestionOracle: Send + Sync {
    async fn suggest(&self, request: &CompletionRequest) -> Result<Option<String>, ApiError>;
}

/// A single suggestion for a caret offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub text: String,
    pub offset: usize,
}

impl Suggestion {
    /// Ghost text anchored at `start`, the editor position of `offset`. It
    /// spans the suggestion's length on that line.
    pub fn inline_completion(&self, start: Position) -> InlineCompletion {
        let width = self.text.chars().count() as u32;
        InlineCompletion {
            insert_text: self.text.clone(),
            anchor_offset: self.offset,
            range: Range::new(start, Position::new(start.line, start.column + width)),
        }
    }
}

/// Stateless request/response bridge to a [`SuggestionOracle`].
#[derive(Clone)]
pub struct CompletionBridge {
    oracle: Arc<dyn SuggestionOracle>,
    language: String,
}

impl CompletionBridge {
    pub fn new(oracle: Arc<dyn SuggestionOracle>, language: impl Into<String>) -> Self {
        Self {
            oracle,
            language: language.into(),
        }
    }

    /// Ask for a suggestion at `cursor_offset`. Errors and empty answers both
    /// yield `None`.
    pub async fn request_completion(&self, buffer_text: &str, cursor_offset: usize) -> Option<Suggestion> {
        let request = CompletionRequest {
            code: buffer_text.to_string(),
            cursor_position: cursor_offset,
            language: self.language.clone(),
        };

        match self.oracle.suggest(&request).await {
            Ok(Some(text)) if !text.is_empty() => Some(Suggestion {
                text,
                offset: cursor_offset,
            }),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Suggestion request failed: {e}");
                None
            }
        }
    }
}
