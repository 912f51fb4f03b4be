//! Two-phase hierarchical search.
//!
//! Phase 1 narrows the whole corpus to a single document by scoring the
//! summary tier against the query; phase 2 retrieves passages from the
//! passage tier restricted to that one document. Only one document is
//! ever consulted per query — a deliberate precision/latency trade for a
//! small corpus where cross-document synthesis is not needed.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::embedding;
use crate::error::EngineError;
use crate::index;
use crate::models::PassageHit;
use crate::registry::Registry;

/// Result of one hierarchical query: ranked passages from the winning
/// document plus that document's id. Both are empty when no enabled,
/// ready document matched.
#[derive(Debug, Default)]
pub struct SearchOutcome {
    pub passages: Vec<PassageHit>,
    pub sources: Vec<String>,
}

impl SearchOutcome {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }
}

/// Run the two-phase search for `query` over the enabled, ready
/// documents of `registry`.
pub async fn hierarchical_search(
    config: &Config,
    pool: &SqlitePool,
    registry: &Registry,
    query: &str,
) -> Result<SearchOutcome, EngineError> {
    let candidates = registry.searchable_ids();
    if candidates.is_empty() {
        tracing::debug!("no enabled ready documents; skipping retrieval");
        return Ok(SearchOutcome::default());
    }

    // One embedding serves both phases.
    let query_vec = embedding::embed_query(&config.embedding, query)
        .await
        .map_err(|e| EngineError::Retrieval(format!("query embedding failed: {e}")))?;

    let winners = index::search_summaries(pool, &query_vec, 1, &candidates).await?;
    let Some((winner, score)) = winners.into_iter().next() else {
        tracing::debug!("summary tier returned no match");
        return Ok(SearchOutcome::default());
    };
    tracing::debug!(doc_id = %winner.doc_id, score, "summary tier selected document");

    let passages =
        index::search_passages(pool, &query_vec, config.retrieval.passage_k, &winner.doc_id)
            .await?;

    Ok(SearchOutcome {
        sources: vec![winner.doc_id],
        passages,
    })
}
