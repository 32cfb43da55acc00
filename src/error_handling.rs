use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

use crate::transform::TransformError;

const MAX_EXAMPLES_PER_KIND: usize = 3;

/// Why a single input line produced no record
#[derive(Debug, Error)]
pub enum LineError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("JSON line is not an object")]
    NotAnObject,
    #[error("missing message field '{0}'")]
    MissingField(String),
    #[error("message field '{0}' is not a string")]
    FieldNotString(String),
    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),
}

impl LineError {
    /// Stable label used for counting and the summary report
    pub fn kind(&self) -> &'static str {
        match self {
            LineError::InvalidUtf8 => "invalid_utf8",
            LineError::InvalidJson(_) => "invalid_json",
            LineError::NotAnObject => "not_object",
            LineError::MissingField(_) => "missing_field",
            LineError::FieldNotString(_) => "field_not_string",
            LineError::Transform(_) => "transform",
        }
    }
}

/// Per-kind counts of dropped lines, with a few examples of each
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorSummary {
    counts: BTreeMap<&'static str, usize>,
    examples: BTreeMap<&'static str, Vec<String>>,
}

impl ErrorSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, error: &LineError, line_num: usize) {
        let kind = error.kind();
        *self.counts.entry(kind).or_insert(0) += 1;

        let examples = self.examples.entry(kind).or_default();
        if examples.len() < MAX_EXAMPLES_PER_KIND {
            examples.push(format!("line {}: {}", line_num, error));
        }
    }

    pub fn merge(&mut self, other: ErrorSummary) {
        for (kind, count) in other.counts {
            *self.counts.entry(kind).or_insert(0) += count;
        }
        for (kind, examples) in other.examples {
            let existing = self.examples.entry(kind).or_default();
            let room = MAX_EXAMPLES_PER_KIND.saturating_sub(existing.len());
            existing.extend(examples.into_iter().take(room));
        }
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// JSON summary for `--stats`, `None` when nothing was dropped
    pub fn format_summary(&self) -> Option<String> {
        if self.counts.is_empty() {
            return None;
        }

        let mut summary = json!({});
        for (kind, count) in &self.counts {
            let examples = self.examples.get(kind).cloned().unwrap_or_default();
            summary[*kind] = json!({
                "count": count,
                "examples": examples,
            });
        }

        Some(
            serde_json::to_string_pretty(&summary)
                .unwrap_or_else(|_| "Error serializing summary".to_string()),
        )
    }
}

/// Log a dropped line once and account for it in `summary`
pub fn report_line_error(summary: &mut ErrorSummary, error: &LineError, line_num: usize) {
    warn!(line = line_num, kind = error.kind(), error = %error, "dropping line");
    summary.record(error, line_num);
}
