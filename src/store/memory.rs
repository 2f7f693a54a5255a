//! In-memory resource store
//!
//! Backs tests and the `--store memory` development mode. Mirrors the
//! conditional-patch semantics of the Kubernetes adapter: every mutation
//! bumps a per-resource version, and a patch carrying a stale expected
//! version is rejected without applying anything.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    FetchedResource, LockPatch, ResourceEntry, ResourceKey, ResourceStore, StoreError, Version,
    ANNOTATION_BOOKED_AT, ANNOTATION_BOOKED_BY,
};

#[derive(Debug, Clone, Default)]
struct Entry {
    annotations: HashMap<String, String>,
    version: u64,
}

/// In-memory [`ResourceStore`] implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<(String, String), Entry>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource so it can be booked. Resources that were never
    /// inserted behave as absent, matching the external store.
    pub async fn insert_resource(&self, scope: impl Into<String>, name: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner
            .entry((scope.into(), name.into()))
            .or_insert_with(Entry::default);
    }

    /// Overwrite a resource's annotations directly, bypassing version
    /// checks. Test seam for constructing pre-existing lock states.
    pub async fn set_annotations(
        &self,
        scope: &str,
        name: &str,
        annotations: HashMap<String, String>,
    ) {
        let mut inner = self.inner.write().await;
        let entry = inner
            .entry((scope.to_string(), name.to_string()))
            .or_insert_with(Entry::default);
        entry.annotations = annotations;
        entry.version += 1;
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(&self, key: &ResourceKey) -> Result<FetchedResource, StoreError> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(&(key.scope.clone(), key.name.clone()))
            .ok_or_else(|| StoreError::not_found(key))?;

        Ok(FetchedResource {
            annotations: entry.annotations.clone(),
            version: Version(entry.version.to_string()),
        })
    }

    async fn list(&self, scope: &str) -> Result<Vec<ResourceEntry>, StoreError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<ResourceEntry> = inner
            .iter()
            .filter(|((s, _), _)| s == scope)
            .map(|((_, name), entry)| ResourceEntry {
                name: name.clone(),
                annotations: entry.annotations.clone(),
            })
            .collect();

        // Deterministic order makes test assertions simpler; callers must
        // not rely on it.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn patch(
        &self,
        key: &ResourceKey,
        patch: LockPatch,
        expected_version: Option<&Version>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(&(key.scope.clone(), key.name.clone()))
            .ok_or_else(|| StoreError::not_found(key))?;

        if let Some(expected) = expected_version {
            if expected.0 != entry.version.to_string() {
                return Err(StoreError::VersionConflict);
            }
        }

        match patch {
            LockPatch::Set {
                holder,
                acquired_at,
            } => {
                entry
                    .annotations
                    .insert(ANNOTATION_BOOKED_BY.to_string(), holder);
                entry.annotations.insert(
                    ANNOTATION_BOOKED_AT.to_string(),
                    acquired_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                );
            }
            LockPatch::Clear => {
                entry.annotations.remove(ANNOTATION_BOOKED_BY);
                entry.annotations.remove(ANNOTATION_BOOKED_AT);
            }
        }

        entry.version += 1;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
