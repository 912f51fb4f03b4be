//! Domain error taxonomy.
//!
//! Every failure class has a distinct variant so callers can decide the
//! degradation path without string matching: validation and not-found
//! errors are reported synchronously, ingestion errors are recorded into
//! the registry, retrieval errors degrade the chat to ungrounded
//! answering, and model errors terminate a stream with an `error` segment.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected before any state mutation (bad upload type, bad id).
    #[error("{0}")]
    Validation(String),

    /// Duplicate document id without a forced replacement.
    #[error("document already exists: {0}")]
    Conflict(String),

    /// Toggle/delete/process on an unknown document id.
    #[error("document not found: {0}")]
    NotFound(String),

    /// Extraction, summarization, or indexing failure during the
    /// background run. Recorded into the registry, never raised back to
    /// the uploader.
    #[error("ingestion failed: {0}")]
    Ingestion(String),

    /// Index unavailable during search. Callers fall back to the
    /// ungrounded answer path.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// The language model cannot be reached or rejected the request.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
}
