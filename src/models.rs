//! Core data types used throughout Groundwork.
//!
//! These types represent the registry entries, passages, summary records,
//! and stream segments that flow through the ingestion, retrieval, and
//! chat pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered document.
///
/// Permitted transitions: `Processing → Ready` and `Processing → Error`.
/// A document enters `Processing` at upload time and leaves it only when
/// the background run reports back through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    Processing,
    Ready,
    Error,
}

impl std::fmt::Display for DocStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocStatus::Processing => write!(f, "processing"),
            DocStatus::Ready => write!(f, "ready"),
            DocStatus::Error => write!(f, "error"),
        }
    }
}

/// A document's registry record. The document id is the key of the
/// persisted flat mapping, so it does not appear in the entry itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// User-controlled visibility toggle. Disabled documents are skipped
    /// by search regardless of lifecycle state.
    pub enabled: bool,
    pub status: DocStatus,
    #[serde(default)]
    pub chunk_count: usize,
    /// Populated only once the document is `Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Populated only when the document is in `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl RegistryEntry {
    /// A fresh entry as created at upload time.
    pub fn processing() -> Self {
        Self {
            enabled: true,
            status: DocStatus::Processing,
            chunk_count: 0,
            summary: None,
            error: None,
            uploaded_at: Utc::now(),
        }
    }
}

/// A bounded-size extract of a document's text, the unit indexed for
/// fine-grained search. Immutable once written; deleted en masse with
/// its source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub doc_id: String,
    pub chunk_index: i64,
    /// 1-based page the passage starts on.
    pub page: i64,
    pub text: String,
}

/// A generated synopsis of an entire document, the unit indexed for
/// coarse document selection. Exactly one per `Ready` document.
#[derive(Debug, Clone)]
pub struct SummaryRecord {
    pub doc_id: String,
    pub text: String,
}

/// A passage together with its similarity score for the current query.
#[derive(Debug, Clone)]
pub struct PassageHit {
    pub passage: Passage,
    pub score: f32,
}

/// Ephemeral unit emitted to the chat consumer. Never persisted.
///
/// Consumers must concatenate successive `FinalAnswer` payloads to
/// reconstruct the complete answer text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum Segment {
    Thought(String),
    FinalAnswer(String),
    Sources(Vec<String>),
    Done,
    Error(String),
}

/// Body of `POST /chat-stream`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
}

fn default_use_rag() -> bool {
    true
}

/// Body of `POST /documents/toggle`.
#[derive(Debug, Clone, Deserialize)]
pub struct ToggleRequest {
    pub id: String,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DocStatus::Ready).unwrap(), "\"ready\"");
        assert_eq!(
            serde_json::to_string(&DocStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn segment_wire_format() {
        let seg = Segment::Thought("hm".to_string());
        assert_eq!(
            serde_json::to_string(&seg).unwrap(),
            r#"{"type":"thought","content":"hm"}"#
        );
        assert_eq!(
            serde_json::to_string(&Segment::Done).unwrap(),
            r#"{"type":"done"}"#
        );
        assert_eq!(
            serde_json::to_string(&Segment::Sources(vec!["a.pdf".into()])).unwrap(),
            r#"{"type":"sources","content":["a.pdf"]}"#
        );
    }

    #[test]
    fn chat_request_defaults_to_rag() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert!(req.use_rag);
    }

    #[test]
    fn entry_omits_absent_fields() {
        let entry = RegistryEntry::processing();
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("summary"));
        assert!(!json.contains("\"error\""));
    }
}
