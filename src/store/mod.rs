//! Resource store abstraction
//!
//! This module provides a trait-based abstraction over the external object
//! store that owns the locked resources. Lock state is not stored by this
//! service at all: it lives in two reserved metadata annotations on the
//! resource itself, and the store is the single source of truth.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Booking Coordinator            │
//! └─────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────┐
//! │             ResourceStore trait             │
//! │        get / list / patch(version?)         │
//! └─────────────────────────────────────────────┘
//!            │                       │
//!            ▼                       ▼
//! ┌─────────────────────┐ ┌─────────────────────┐
//! │     Kubernetes      │ │      In-memory      │
//! │  (ArgoCD Apps API)  │ │  (tests, dev mode)  │
//! └─────────────────────┘ └─────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod kube;
pub mod memory;

pub use kube::{KubeStore, KubeStoreConfig};
pub use memory::MemoryStore;

/// Annotation carrying the identity of the current lock holder.
pub const ANNOTATION_BOOKED_BY: &str = "booking.argocd.io/booked-by";

/// Annotation carrying the RFC3339 timestamp of the last successful acquire.
pub const ANNOTATION_BOOKED_AT: &str = "booking.argocd.io/booked-at";

// ============================================================================
// Core Types
// ============================================================================

/// Composite identity of a lockable resource: `(scope, name)`.
///
/// The scope is a namespace-like grouping (a Kubernetes namespace for the
/// ArgoCD backend); both parts are supplied by the caller on every call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub scope: String,
    pub name: String,
}

impl ResourceKey {
    /// Create a new key from scope and name.
    pub fn new(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            name: name.into(),
        }
    }

    /// Parse a `scope:name` pair as carried in the application header.
    ///
    /// Splits on the first `:`; both parts must be non-empty.
    pub fn parse(raw: &str) -> Option<Self> {
        let (scope, name) = raw.split_once(':')?;
        if scope.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(scope, name))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Opaque token representing a resource's last-observed state.
///
/// Passed back to [`ResourceStore::patch`] to make the write conditional:
/// the store rejects the patch atomically if the resource changed since
/// the version was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(pub String);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resource's metadata as fetched from the store.
#[derive(Debug, Clone)]
pub struct FetchedResource {
    /// All metadata annotations present on the resource.
    pub annotations: HashMap<String, String>,

    /// Version observed at read time, for conditional writes.
    pub version: Version,
}

/// One entry of a scope listing: resource name plus its annotations.
#[derive(Debug, Clone)]
pub struct ResourceEntry {
    pub name: String,
    pub annotations: HashMap<String, String>,
}

/// The only metadata mutation the coordinator ever issues.
///
/// Both reserved annotations are always written together: set on acquire,
/// cleared on release. Partially populated lock state must not occur under
/// correct writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockPatch {
    /// Stamp the resource as held by `holder` since `acquired_at`.
    Set {
        holder: String,
        acquired_at: DateTime<Utc>,
    },

    /// Remove both lock annotations.
    Clear,
}

// ============================================================================
// Store Errors
// ============================================================================

/// Errors surfaced by resource store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The resource does not exist in the store.
    #[error("resource {scope}/{name} not found")]
    NotFound { scope: String, name: String },

    /// A conditional patch was rejected because the resource changed
    /// since the expected version was observed.
    #[error("resource version changed since read")]
    VersionConflict,

    /// The store rejected our credentials.
    #[error("store rejected credentials: {0}")]
    Auth(String),

    /// Transport-level failure talking to the store. Safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not interpret.
    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn not_found(key: &ResourceKey) -> Self {
        Self::NotFound {
            scope: key.scope.clone(),
            name: key.name.clone(),
        }
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Adapter interface over the external object store.
///
/// Implementations must guarantee that `patch` with an `expected_version`
/// is applied atomically: either the resource still carries that version
/// and the patch lands, or nothing is written and
/// [`StoreError::VersionConflict`] is returned.
#[async_trait]
pub trait ResourceStore: Send + Sync + std::fmt::Debug {
    /// Fetch current annotations and version for a single resource.
    async fn get(&self, key: &ResourceKey) -> Result<FetchedResource, StoreError>;

    /// Enumerate all resources in a scope with their annotations.
    async fn list(&self, scope: &str) -> Result<Vec<ResourceEntry>, StoreError>;

    /// Apply a lock-annotation patch to a resource.
    ///
    /// When `expected_version` is given the write is conditional on the
    /// resource still being at that version.
    async fn patch(
        &self,
        key: &ResourceKey,
        patch: LockPatch,
        expected_version: Option<&Version>,
    ) -> Result<(), StoreError>;
}

// ============================================================================
// Tests
// ============================================================================
