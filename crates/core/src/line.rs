//! Records derived from the non-blank lines of an ingested file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::FileId;

/// Whether a line was interpreted successfully.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineState {
    Parsed,
    Errored,
}

impl LineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineState::Parsed => "parsed",
            LineState::Errored => "errored",
        }
    }
}

/// Result of interpreting one line: a structured payload or the parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LineOutcome {
    Parsed { payload: JsonValue },
    Errored { error: String },
}

/// One persisted line.
///
/// `line_number` is 1-based and counts only non-blank lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub file_id: FileId,
    pub line_number: u64,
    /// Trimmed source text.
    pub raw_text: String,
    #[serde(flatten)]
    pub outcome: LineOutcome,
    pub created_at: DateTime<Utc>,
}

impl LineRecord {
    pub fn parsed(file_id: FileId, line_number: u64, raw_text: String, payload: JsonValue) -> Self {
        Self {
            file_id,
            line_number,
            raw_text,
            outcome: LineOutcome::Parsed { payload },
            created_at: Utc::now(),
        }
    }

    pub fn errored(file_id: FileId, line_number: u64, raw_text: String, error: String) -> Self {
        Self {
            file_id,
            line_number,
            raw_text,
            outcome: LineOutcome::Errored { error },
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> LineState {
        match self.outcome {
            LineOutcome::Parsed { .. } => LineState::Parsed,
            LineOutcome::Errored { .. } => LineState::Errored,
        }
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        match &self.outcome {
            LineOutcome::Parsed { payload } => Some(payload),
            LineOutcome::Errored { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            LineOutcome::Parsed { .. } => None,
            LineOutcome::Errored { error } => Some(error),
        }
    }
}
