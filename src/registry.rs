//! Durable document registry.
//!
//! A flat JSON mapping of document id to [`RegistryEntry`], rewritten
//! wholesale on every mutation. The persisted file — not any in-memory
//! copy — is the source of truth: the ingestion worker may run in a
//! separate process, so both sides re-load before acting and communicate
//! only through this file and the vector indices.
//!
//! `load` on a missing or corrupt file yields an empty registry; search
//! and ingestion must tolerate a fresh store.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::models::{DocStatus, RegistryEntry};

pub struct Registry {
    path: PathBuf,
    entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    /// Read the persisted registry. Missing or unparseable files yield an
    /// empty registry rather than an error.
    pub fn load(path: &Path) -> Self {
        let entries = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    /// Atomic full rewrite: serialize to a sibling temp file, then rename
    /// over the target so readers never observe a partial write.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(&self.entries)?;
        std::fs::write(&tmp, body)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RegistryEntry> {
        self.entries.get(id)
    }

    /// Full snapshot, ordered by id.
    pub fn list(&self) -> &BTreeMap<String, RegistryEntry> {
        &self.entries
    }

    /// Insert a fresh `Processing` entry and persist.
    pub fn create(&mut self, id: &str) -> Result<()> {
        self.entries
            .insert(id.to_string(), RegistryEntry::processing());
        self.save()
    }

    /// `Processing → Ready`, recording the summary and passage count.
    pub fn mark_ready(
        &mut self,
        id: &str,
        summary: String,
        chunk_count: usize,
    ) -> Result<(), EngineError> {
        self.transition(id, DocStatus::Ready, Some(summary), chunk_count, None)
    }

    /// `Processing → Error`, recording the failure message.
    pub fn mark_error(&mut self, id: &str, message: String) -> Result<(), EngineError> {
        self.transition(id, DocStatus::Error, None, 0, Some(message))
    }

    fn transition(
        &mut self,
        id: &str,
        status: DocStatus,
        summary: Option<String>,
        chunk_count: usize,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        if entry.status != DocStatus::Processing {
            // A racing forced re-upload can have replaced the entry; the
            // final writer's run owns the outcome.
            tracing::warn!(id, from = %entry.status, to = %status, "status transition from non-processing entry");
        }
        entry.status = status;
        entry.summary = summary;
        entry.chunk_count = chunk_count;
        entry.error = error;
        self.save()
            .map_err(|e| EngineError::Ingestion(format!("failed to persist registry: {e}")))?;
        Ok(())
    }

    /// Flip the visibility toggle. Returns `NotFound` for unknown ids;
    /// persisting an unchanged value is a harmless no-op rewrite.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<(), EngineError> {
        let entry = self
            .entries
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        entry.enabled = enabled;
        self.save()
            .map_err(|e| EngineError::Ingestion(format!("failed to persist registry: {e}")))?;
        Ok(())
    }

    /// Remove an entry and persist. Returns the removed entry, if any.
    pub fn remove(&mut self, id: &str) -> Result<Option<RegistryEntry>> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    /// Ids eligible for search: enabled and fully ingested.
    pub fn searchable_ids(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.enabled && e.status == DocStatus::Ready)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(&dir.path().join("registry.json"));
        assert!(registry.list().is_empty());
    }

    #[test]
    fn load_corrupt_file_yields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();
        let registry = Registry::load(&path);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn create_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.create("guidelines.pdf").unwrap();

        // Observable by a fresh load, as the worker process would see it.
        let reloaded = Registry::load(&path);
        let entry = reloaded.get("guidelines.pdf").unwrap();
        assert_eq!(entry.status, DocStatus::Processing);
        assert!(entry.enabled);
        assert_eq!(entry.chunk_count, 0);
    }

    #[test]
    fn ready_transition_records_summary_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.create("a.pdf").unwrap();
        registry
            .mark_ready("a.pdf", "About dosage tables.".to_string(), 12)
            .unwrap();

        let reloaded = Registry::load(&path);
        let entry = reloaded.get("a.pdf").unwrap();
        assert_eq!(entry.status, DocStatus::Ready);
        assert_eq!(entry.chunk_count, 12);
        assert_eq!(entry.summary.as_deref(), Some("About dosage tables."));
        assert!(entry.error.is_none());
    }

    #[test]
    fn error_transition_records_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.create("b.pdf").unwrap();
        registry
            .mark_error("b.pdf", "extraction failed".to_string())
            .unwrap();

        let entry = Registry::load(&path);
        let entry = entry.get("b.pdf").unwrap();
        assert_eq!(entry.status, DocStatus::Error);
        assert_eq!(entry.error.as_deref(), Some("extraction failed"));
        assert!(entry.summary.is_none());
    }

    #[test]
    fn transitions_on_unknown_id_report_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::load(&dir.path().join("registry.json"));
        assert!(matches!(
            registry.mark_ready("ghost.pdf", String::new(), 1),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            registry.set_enabled("ghost.pdf", false),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn toggle_with_current_value_changes_nothing_else() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.create("c.pdf").unwrap();
        registry.mark_ready("c.pdf", "s".to_string(), 7).unwrap();

        registry.set_enabled("c.pdf", true).unwrap();
        let entry = registry.get("c.pdf").unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.status, DocStatus::Ready);
        assert_eq!(entry.chunk_count, 7);
    }

    #[test]
    fn searchable_ids_filters_disabled_and_unready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.create("ready.pdf").unwrap();
        registry.mark_ready("ready.pdf", "s".to_string(), 1).unwrap();
        registry.create("pending.pdf").unwrap();
        registry.create("hidden.pdf").unwrap();
        registry.mark_ready("hidden.pdf", "s".to_string(), 1).unwrap();
        registry.set_enabled("hidden.pdf", false).unwrap();

        assert_eq!(registry.searchable_ids(), vec!["ready.pdf".to_string()]);
    }

    #[test]
    fn remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::load(&path);
        registry.create("d.pdf").unwrap();
        assert!(registry.remove("d.pdf").unwrap().is_some());
        assert!(registry.remove("d.pdf").unwrap().is_none());

        assert!(!Registry::load(&path).contains("d.pdf"));
    }
}
