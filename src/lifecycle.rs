//! Document lifecycle operations: toggle, delete, list.

use sqlx::SqlitePool;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::error::EngineError;
use crate::models::RegistryEntry;
use crate::registry::Registry;

/// Full registry snapshot, ordered by id.
pub fn list_documents(config: &Config) -> BTreeMap<String, RegistryEntry> {
    Registry::load(&config.storage.registry_path).list().clone()
}

/// Flip a document's visibility. Only the `enabled` flag is touched;
/// lifecycle state and indexed data stay as they are.
pub fn toggle_document(config: &Config, id: &str, enabled: bool) -> Result<(), EngineError> {
    let mut registry = Registry::load(&config.storage.registry_path);
    registry.set_enabled(id, enabled)?;
    tracing::info!(id, enabled, "document visibility changed");
    Ok(())
}

/// Remove a document everywhere: both index tiers, the stored file, and
/// the registry entry. Index and file removal are best-effort — the
/// registry entry always goes, so the document disappears from every
/// list and search even if a stale record lingers in an unreachable
/// index.
pub async fn delete_document(
    config: &Config,
    pool: &SqlitePool,
    id: &str,
) -> Result<(), EngineError> {
    let mut registry = Registry::load(&config.storage.registry_path);
    if !registry.contains(id) {
        return Err(EngineError::NotFound(id.to_string()));
    }

    if let Err(e) = crate::index::delete_document(pool, id).await {
        tracing::warn!(id, error = %e, "index cleanup failed; continuing");
    }

    let path = config.storage.documents_dir.join(id);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(id, error = %e, "stored file removal failed; continuing");
        }
    }

    registry
        .remove(id)
        .map_err(|e| EngineError::Ingestion(format!("cannot persist registry: {e}")))?;
    tracing::info!(id, "document deleted");
    Ok(())
}
