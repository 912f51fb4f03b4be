//! Ingestion pipeline.
//!
//! Upload validates and stores the file, registers the document as
//! `processing`, and returns; the heavy work — extraction,
//! summarization, splitting, embedding, indexing — runs afterwards in
//! [`process_document`], either as a spawned task in the serving process
//! or as a separate `gw process` invocation. The two sides coordinate
//! only through the persisted registry and the indices; completion is
//! observed by re-reading the registry, never by callback.

use sqlx::SqlitePool;

use crate::chunk;
use crate::config::Config;
use crate::embedding;
use crate::error::EngineError;
use crate::extract;
use crate::index;
use crate::lifecycle;
use crate::llm::LanguageModel;
use crate::models::SummaryRecord;
use crate::registry::Registry;

/// Validate and store an uploaded document, creating its `processing`
/// registry entry. Fails before any state mutation on a bad filename or
/// an unforced duplicate. With `force`, the prior entry and all of its
/// indexed records are deleted first.
pub async fn upload_document(
    config: &Config,
    pool: &SqlitePool,
    filename: &str,
    bytes: &[u8],
    force: bool,
) -> Result<(), EngineError> {
    validate_filename(filename)?;

    let mut registry = Registry::load(&config.storage.registry_path);
    if registry.contains(filename) {
        if !force {
            return Err(EngineError::Conflict(filename.to_string()));
        }
        // Last forced upload wins: clear the previous generation before
        // recreating the entry.
        lifecycle::delete_document(config, pool, filename).await?;
        registry = Registry::load(&config.storage.registry_path);
    }

    std::fs::create_dir_all(&config.storage.documents_dir).map_err(|e| {
        EngineError::Ingestion(format!("cannot create documents directory: {e}"))
    })?;
    let path = config.storage.documents_dir.join(filename);
    std::fs::write(&path, bytes)
        .map_err(|e| EngineError::Ingestion(format!("cannot store upload: {e}")))?;

    registry
        .create(filename)
        .map_err(|e| EngineError::Ingestion(format!("cannot register document: {e}")))?;

    tracing::info!(id = filename, size = bytes.len(), force, "document accepted");
    Ok(())
}

fn validate_filename(filename: &str) -> Result<(), EngineError> {
    if !filename.to_ascii_lowercase().ends_with(".pdf") {
        return Err(EngineError::Validation(
            "only PDF documents are accepted".to_string(),
        ));
    }
    if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
        return Err(EngineError::Validation(
            "filename must not contain path separators".to_string(),
        ));
    }
    Ok(())
}

/// The background run: `processing → ready` on success, `processing →
/// error` on any failure. Never returns the failure to the uploader —
/// the outcome is recorded in the registry, where a later list/poll
/// observes it.
pub async fn process_document(
    config: &Config,
    pool: &SqlitePool,
    model: &dyn LanguageModel,
    id: &str,
) {
    match run_pipeline(config, pool, model, id).await {
        Ok((summary, chunk_count)) => {
            // Re-read: the entry may have changed since this run started
            // (forced re-upload, deletion) and the file is the truth.
            let mut registry = Registry::load(&config.storage.registry_path);
            match registry.mark_ready(id, summary, chunk_count) {
                Ok(()) => tracing::info!(id, chunk_count, "document ready"),
                Err(e) => tracing::warn!(id, error = %e, "could not record ready status"),
            }
        }
        Err(e) => {
            tracing::warn!(id, error = %e, "ingestion failed");
            // Best-effort cleanup of this attempt's partial index
            // writes, so a document marked `error` owns no records.
            if let Err(cleanup) = index::delete_document(pool, id).await {
                tracing::warn!(id, error = %cleanup, "could not clear partial index records");
            }
            let mut registry = Registry::load(&config.storage.registry_path);
            if let Err(record) = registry.mark_error(id, e.to_string()) {
                tracing::warn!(id, error = %record, "could not record error status");
            }
        }
    }
}

async fn run_pipeline(
    config: &Config,
    pool: &SqlitePool,
    model: &dyn LanguageModel,
    id: &str,
) -> Result<(String, usize), EngineError> {
    let path = config.storage.documents_dir.join(id);
    let bytes = std::fs::read(&path)
        .map_err(|e| EngineError::Ingestion(format!("cannot read stored file: {e}")))?;

    let repaired = extract::repair_signature(&bytes)
        .ok_or_else(|| EngineError::Ingestion("no PDF signature found".to_string()))?;
    if repaired.len() < bytes.len() {
        tracing::debug!(id, dropped = bytes.len() - repaired.len(), "discarded junk prefix");
    }

    let pages = extract::extract_pages(repaired)?;
    let full_text: String = pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    if full_text.trim().is_empty() {
        return Err(EngineError::Ingestion("document has no extractable text".to_string()));
    }

    let summary = model
        .summarize(&full_text)
        .await
        .map_err(|e| EngineError::Ingestion(format!("summarization failed: {e}")))?;

    let passages = chunk::split_passages(
        id,
        &pages,
        config.chunking.max_chars,
        config.chunking.overlap_chars,
    );
    if passages.is_empty() {
        return Err(EngineError::Ingestion("splitting produced no passages".to_string()));
    }

    // Summary tier first, then the passages in batches.
    let summary_vec = embedding::embed_query(&config.embedding, &summary)
        .await
        .map_err(|e| EngineError::Ingestion(format!("summary embedding failed: {e}")))?;
    index::add_summary(
        pool,
        &SummaryRecord {
            doc_id: id.to_string(),
            text: summary.clone(),
        },
        &summary_vec,
    )
    .await
    .map_err(|e| EngineError::Ingestion(format!("summary indexing failed: {e}")))?;

    for batch in passages.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = embedding::embed_texts(&config.embedding, &texts)
            .await
            .map_err(|e| EngineError::Ingestion(format!("passage embedding failed: {e}")))?;
        index::add_passages(pool, batch, &vectors)
            .await
            .map_err(|e| EngineError::Ingestion(format!("passage indexing failed: {e}")))?;
    }

    Ok((summary, passages.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_validation() {
        assert!(validate_filename("guide.pdf").is_ok());
        assert!(validate_filename("GUIDE.PDF").is_ok());
        assert!(matches!(
            validate_filename("notes.txt"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_filename("../escape.pdf"),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            validate_filename("dir/guide.pdf"),
            Err(EngineError::Validation(_))
        ));
    }
}
