//! Booking coordinator: the lock decision logic
//!
//! Every operation is a read of the resource's current annotations
//! followed, when a state change is needed, by a single conditional patch.
//! The patch carries the version observed at read time, so a concurrent
//! mutation of the same resource causes the store to reject the write
//! atomically instead of silently overwriting the other holder.
//!
//! The coordinator keeps no state of its own; any number of replicas can
//! serve requests for the same resource concurrently.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{
    LockPatch, ResourceEntry, ResourceKey, ResourceStore, StoreError, ANNOTATION_BOOKED_AT,
    ANNOTATION_BOOKED_BY,
};

// ============================================================================
// Lock State
// ============================================================================

/// Lock state of a single resource, projected from its annotations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    /// No holder annotation present.
    Unlocked,

    /// Held by `holder` since `acquired_at`.
    ///
    /// A missing or unparseable timestamp still counts as held; it should
    /// not occur under correct writes but must not unlock anyone.
    Held {
        holder: String,
        acquired_at: Option<DateTime<Utc>>,
    },
}

impl LockState {
    /// Project the lock state out of a resource's annotation map.
    pub fn from_annotations(annotations: &std::collections::HashMap<String, String>) -> Self {
        let holder = match annotations.get(ANNOTATION_BOOKED_BY) {
            Some(holder) if !holder.is_empty() => holder.clone(),
            _ => return Self::Unlocked,
        };

        let acquired_at = annotations
            .get(ANNOTATION_BOOKED_AT)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Self::Held {
            holder,
            acquired_at,
        }
    }

    /// The current holder, if any.
    pub fn holder(&self) -> Option<&str> {
        match self {
            Self::Unlocked => None,
            Self::Held { holder, .. } => Some(holder),
        }
    }
}

/// A held lock tagged with its resource identity, as returned by
/// [`BookingCoordinator::list_held`] and serialized on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub app_name: String,
    pub namespace: String,
    pub booked_by: String,
    pub booked_at: String,
}

impl LockRecord {
    fn from_entry(scope: &str, entry: &ResourceEntry) -> Option<Self> {
        match LockState::from_annotations(&entry.annotations) {
            LockState::Unlocked => None,
            LockState::Held {
                holder,
                acquired_at,
            } => Some(Self {
                app_name: entry.name.clone(),
                namespace: scope.to_string(),
                booked_by: holder,
                booked_at: acquired_at
                    .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
            }),
        }
    }
}

// ============================================================================
// Booking Errors
// ============================================================================

/// Typed outcomes of coordinator operations that are not plain success.
#[derive(Debug, Error)]
pub enum BookingError {
    /// Acquire refused: someone else holds the lock, or the resource
    /// changed between read and conditional write.
    #[error("{}", conflict_message(.holder))]
    Conflict { holder: Option<String> },

    /// Release refused: the caller neither holds the lock nor is
    /// privileged.
    #[error("application is booked by {holder}, only they or an admin can unbook")]
    Forbidden { holder: String },

    /// The underlying resource does not exist.
    #[error("application {key} not found")]
    NotFound { key: ResourceKey },

    /// The store could not be reached or refused us.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

fn conflict_message(holder: &Option<String>) -> String {
    match holder.as_deref() {
        Some(holder) => format!("application already booked by {holder}"),
        None => String::from("application was modified concurrently, retry"),
    }
}

impl BookingError {
    fn from_store(key: &ResourceKey, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound { key: key.clone() },
            other => Self::Store(other),
        }
    }
}

// ============================================================================
// Booking Coordinator
// ============================================================================

/// The lock decision logic over an abstract resource store.
pub struct BookingCoordinator {
    store: Arc<dyn ResourceStore>,
}

impl BookingCoordinator {
    /// Create a coordinator over the given store.
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Read the current lock state of a resource. No side effects.
    pub async fn query(&self, key: &ResourceKey) -> Result<LockState, BookingError> {
        let fetched = self
            .store
            .get(key)
            .await
            .map_err(|e| BookingError::from_store(key, e))?;

        Ok(LockState::from_annotations(&fetched.annotations))
    }

    /// Acquire the lock for `caller`.
    ///
    /// Re-acquiring a lock the caller already holds succeeds without a
    /// write, so a client retrying after a timeout cannot lock itself out.
    pub async fn acquire(&self, key: &ResourceKey, caller: &str) -> Result<(), BookingError> {
        let fetched = self
            .store
            .get(key)
            .await
            .map_err(|e| BookingError::from_store(key, e))?;

        match LockState::from_annotations(&fetched.annotations) {
            LockState::Held { holder, .. } if holder == caller => {
                tracing::debug!(key = %key, caller = %caller, "already booked by caller");
                Ok(())
            }
            LockState::Held { holder, .. } => Err(BookingError::Conflict {
                holder: Some(holder),
            }),
            LockState::Unlocked => {
                let patch = LockPatch::Set {
                    holder: caller.to_string(),
                    acquired_at: Utc::now(),
                };
                match self.store.patch(key, patch, Some(&fetched.version)).await {
                    Ok(()) => {
                        tracing::info!(key = %key, caller = %caller, "booked");
                        Ok(())
                    }
                    Err(StoreError::VersionConflict) => Err(self.stale_write_conflict(key).await),
                    Err(e) => Err(BookingError::from_store(key, e)),
                }
            }
        }
    }

    /// Release the lock on behalf of `caller`.
    ///
    /// Releasing an unlocked resource is a success, so retries are safe.
    /// A privileged caller may release any holder's lock; there is no
    /// automatic expiry, so this is the only way out of an abandoned lock.
    pub async fn release(
        &self,
        key: &ResourceKey,
        caller: &str,
        caller_is_privileged: bool,
    ) -> Result<(), BookingError> {
        let fetched = self
            .store
            .get(key)
            .await
            .map_err(|e| BookingError::from_store(key, e))?;

        let holder = match LockState::from_annotations(&fetched.annotations) {
            LockState::Unlocked => {
                tracing::debug!(key = %key, caller = %caller, "not booked, release is a no-op");
                return Ok(());
            }
            LockState::Held { holder, .. } => holder,
        };

        if holder != caller && !caller_is_privileged {
            return Err(BookingError::Forbidden { holder });
        }

        match self
            .store
            .patch(key, LockPatch::Clear, Some(&fetched.version))
            .await
        {
            Ok(()) => {
                if holder != caller {
                    tracing::info!(key = %key, caller = %caller, holder = %holder, "privileged unbook");
                } else {
                    tracing::info!(key = %key, caller = %caller, "unbooked");
                }
                Ok(())
            }
            Err(StoreError::VersionConflict) => Err(self.stale_write_conflict(key).await),
            Err(e) => Err(BookingError::from_store(key, e)),
        }
    }

    /// Enumerate all currently held locks in a scope.
    ///
    /// Unlocked resources are omitted. Order is not part of the contract.
    pub async fn list_held(&self, scope: &str) -> Result<Vec<LockRecord>, BookingError> {
        let entries = self
            .store
            .list(scope)
            .await
            .map_err(BookingError::Store)?;

        Ok(entries
            .iter()
            .filter_map(|entry| LockRecord::from_entry(scope, entry))
            .collect())
    }

    /// A conditional write lost the race. Re-read once so the conflict can
    /// name the winner; if the re-read fails the conflict stands anonymous.
    async fn stale_write_conflict(&self, key: &ResourceKey) -> BookingError {
        let holder = match self.store.get(key).await {
            Ok(fetched) => LockState::from_annotations(&fetched.annotations)
                .holder()
                .map(str::to_string),
            Err(_) => None,
        };
        tracing::debug!(key = %key, holder = ?holder, "conditional write rejected");
        BookingError::Conflict { holder }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::HashMap;

    fn key() -> ResourceKey {
        ResourceKey::new("argocd", "my-app")
    }

    async fn coordinator_with_app() -> (BookingCoordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_resource("argocd", "my-app").await;
        (BookingCoordinator::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_acquire_then_query_shows_holder() {
        let (coordinator, _) = coordinator_with_app().await;
        let before = Utc::now();

        coordinator.acquire(&key(), "alice").await.unwrap();

        match coordinator.query(&key()).await.unwrap() {
            LockState::Held {
                holder,
                acquired_at,
            } => {
                assert_eq!(holder, "alice");
                let at = acquired_at.unwrap();
                assert!(at >= before - chrono::Duration::seconds(1));
                assert!(at <= Utc::now() + chrono::Duration::seconds(1));
            }
            LockState::Unlocked => panic!("expected held state"),
        }
    }

    #[tokio::test]
    async fn test_reacquire_by_holder_is_idempotent() {
        let (coordinator, _) = coordinator_with_app().await;

        coordinator.acquire(&key(), "alice").await.unwrap();
        coordinator.acquire(&key(), "alice").await.unwrap();

        assert_eq!(
            coordinator.query(&key()).await.unwrap().holder(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_acquire_held_by_other_is_conflict() {
        let (coordinator, _) = coordinator_with_app().await;
        coordinator.acquire(&key(), "alice").await.unwrap();

        let err = coordinator.acquire(&key(), "bob").await.unwrap_err();
        match err {
            BookingError::Conflict { holder } => assert_eq!(holder.as_deref(), Some("alice")),
            other => panic!("expected conflict, got {other:?}"),
        }

        // Loser's attempt left the lock untouched.
        assert_eq!(
            coordinator.query(&key()).await.unwrap().holder(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_release_by_holder_unlocks() {
        let (coordinator, _) = coordinator_with_app().await;
        coordinator.acquire(&key(), "alice").await.unwrap();

        coordinator.release(&key(), "alice", false).await.unwrap();

        assert_eq!(coordinator.query(&key()).await.unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_release_by_other_is_forbidden() {
        let (coordinator, _) = coordinator_with_app().await;
        coordinator.acquire(&key(), "alice").await.unwrap();

        let err = coordinator.release(&key(), "bob", false).await.unwrap_err();
        match err {
            BookingError::Forbidden { holder } => assert_eq!(holder, "alice"),
            other => panic!("expected forbidden, got {other:?}"),
        }
        assert_eq!(
            coordinator.query(&key()).await.unwrap().holder(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_privileged_release_overrides_any_holder() {
        let (coordinator, _) = coordinator_with_app().await;
        coordinator.acquire(&key(), "alice").await.unwrap();

        coordinator.release(&key(), "bob", true).await.unwrap();

        assert_eq!(coordinator.query(&key()).await.unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_release_unlocked_is_noop_for_anyone() {
        let (coordinator, _) = coordinator_with_app().await;

        coordinator.release(&key(), "bob", false).await.unwrap();
        coordinator.release(&key(), "alice", true).await.unwrap();

        assert_eq!(coordinator.query(&key()).await.unwrap(), LockState::Unlocked);
    }

    #[tokio::test]
    async fn test_operations_on_missing_resource_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = BookingCoordinator::new(store);
        let missing = ResourceKey::new("argocd", "ghost");

        assert!(matches!(
            coordinator.query(&missing).await.unwrap_err(),
            BookingError::NotFound { .. }
        ));
        assert!(matches!(
            coordinator.acquire(&missing, "alice").await.unwrap_err(),
            BookingError::NotFound { .. }
        ));
        assert!(matches!(
            coordinator.release(&missing, "alice", true).await.unwrap_err(),
            BookingError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_list_held_returns_only_held_resources() {
        let store = Arc::new(MemoryStore::new());
        store.insert_resource("argocd", "app-free").await;
        store.insert_resource("argocd", "app-alice").await;
        store.insert_resource("argocd", "app-bob").await;
        store.insert_resource("other", "app-elsewhere").await;

        let coordinator = BookingCoordinator::new(store);
        coordinator
            .acquire(&ResourceKey::new("argocd", "app-alice"), "alice")
            .await
            .unwrap();
        coordinator
            .acquire(&ResourceKey::new("argocd", "app-bob"), "bob")
            .await
            .unwrap();
        coordinator
            .acquire(&ResourceKey::new("other", "app-elsewhere"), "carol")
            .await
            .unwrap();

        let records = coordinator.list_held("argocd").await.unwrap();
        assert_eq!(records.len(), 2);

        let by_name: HashMap<&str, &LockRecord> =
            records.iter().map(|r| (r.app_name.as_str(), r)).collect();
        assert_eq!(by_name["app-alice"].booked_by, "alice");
        assert_eq!(by_name["app-bob"].booked_by, "bob");
        assert!(by_name["app-alice"].namespace == "argocd");
        assert!(!by_name["app-alice"].booked_at.is_empty());
        assert!(!by_name.contains_key("app-free"));
    }

    #[tokio::test]
    async fn test_holder_without_timestamp_still_counts_as_held() {
        let (coordinator, store) = coordinator_with_app().await;

        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_BOOKED_BY.to_string(), "alice".to_string());
        store.set_annotations("argocd", "my-app", annotations).await;

        match coordinator.query(&key()).await.unwrap() {
            LockState::Held {
                holder,
                acquired_at,
            } => {
                assert_eq!(holder, "alice");
                assert!(acquired_at.is_none());
            }
            LockState::Unlocked => panic!("expected held state"),
        }

        let err = coordinator.release(&key(), "bob", false).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_empty_holder_annotation_is_unlocked() {
        let (coordinator, store) = coordinator_with_app().await;

        let mut annotations = HashMap::new();
        annotations.insert(ANNOTATION_BOOKED_BY.to_string(), String::new());
        store.set_annotations("argocd", "my-app", annotations).await;

        assert_eq!(coordinator.query(&key()).await.unwrap(), LockState::Unlocked);
    }

    /// Store wrapper that lets a competing writer land right after the
    /// first read, so the caller's conditional write hits a stale version.
    #[derive(Debug)]
    struct RacingStore {
        inner: Arc<MemoryStore>,
        raced: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ResourceStore for RacingStore {
        async fn get(
            &self,
            key: &ResourceKey,
        ) -> Result<crate::store::FetchedResource, StoreError> {
            let fetched = self.inner.get(key).await?;
            if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
                self.inner
                    .patch(
                        key,
                        LockPatch::Set {
                            holder: "bob".into(),
                            acquired_at: Utc::now(),
                        },
                        None,
                    )
                    .await?;
            }
            Ok(fetched)
        }

        async fn list(&self, scope: &str) -> Result<Vec<ResourceEntry>, StoreError> {
            self.inner.list(scope).await
        }

        async fn patch(
            &self,
            key: &ResourceKey,
            patch: LockPatch,
            expected_version: Option<&crate::store::Version>,
        ) -> Result<(), StoreError> {
            self.inner.patch(key, patch, expected_version).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_surfaces_conflict_naming_winner() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert_resource("argocd", "my-app").await;
        let store = Arc::new(RacingStore {
            inner: memory,
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let coordinator = BookingCoordinator::new(store);

        // Alice reads Unlocked, bob lands before her conditional write.
        let err = coordinator.acquire(&key(), "alice").await.unwrap_err();
        match err {
            BookingError::Conflict { holder } => assert_eq!(holder.as_deref(), Some("bob")),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(
            coordinator.query(&key()).await.unwrap().holder(),
            Some("bob")
        );
    }
}
