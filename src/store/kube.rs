//! Kubernetes-backed resource store
//!
//! Talks to the Kubernetes API server's dynamic resource endpoints for
//! ArgoCD `Application` custom resources and maps lock state onto the two
//! reserved booking annotations. Conditional writes ride on the API
//! server's own optimistic concurrency: a merge patch that carries
//! `metadata.resourceVersion` is rejected with 409 if the object moved on
//! since that version was read.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{
    FetchedResource, LockPatch, ResourceEntry, ResourceKey, ResourceStore, StoreError, Version,
    ANNOTATION_BOOKED_AT, ANNOTATION_BOOKED_BY,
};

const APPLICATIONS_API: &str = "apis/argoproj.io/v1alpha1";
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const MERGE_PATCH_CONTENT_TYPE: &str = "application/merge-patch+json";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the Kubernetes store adapter.
#[derive(Debug, Clone)]
pub struct KubeStoreConfig {
    /// Base URL of the API server, e.g. `https://10.0.0.1:443`.
    pub api_url: String,

    /// Bearer token for API server auth.
    pub token: Option<String>,

    /// PEM bundle to trust for the API server's TLS certificate.
    pub ca_cert_path: Option<PathBuf>,

    /// Request timeout.
    pub timeout: Duration,

    /// Retry count for read requests that fail transiently.
    pub retry_count: u32,

    /// Delay between retries.
    pub retry_delay: Duration,
}

impl KubeStoreConfig {
    /// Create a config pointing at an explicit API server URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token: None,
            ca_cert_path: None,
            timeout: Duration::from_secs(10),
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Build a config from the in-cluster environment: API server address
    /// from `KUBERNETES_SERVICE_HOST`/`_PORT`, bearer token and CA bundle
    /// from the service-account mount.
    pub fn in_cluster() -> Result<Self, StoreError> {
        let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| {
            StoreError::Unavailable("KUBERNETES_SERVICE_HOST not set; not running in-cluster".into())
        })?;
        let port =
            std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| String::from("443"));

        let token_path = PathBuf::from(SERVICE_ACCOUNT_DIR).join("token");
        let token = std::fs::read_to_string(&token_path)
            .map_err(|e| {
                StoreError::Auth(format!(
                    "failed to read service account token {}: {e}",
                    token_path.display()
                ))
            })?
            .trim()
            .to_string();

        let ca_path = PathBuf::from(SERVICE_ACCOUNT_DIR).join("ca.crt");

        let mut config = Self::new(format!("https://{host}:{port}"));
        config.token = Some(token);
        if ca_path.exists() {
            config.ca_cert_path = Some(ca_path);
        }
        Ok(config)
    }

    /// Set the bearer token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry count for reads.
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Set the delay between retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
    #[serde(rename = "resourceVersion")]
    resource_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KubeObject {
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct KubeObjectList {
    #[serde(default)]
    items: Vec<KubeObject>,
}

// ============================================================================
// Kubernetes Store
// ============================================================================

/// [`ResourceStore`] backed by the Kubernetes API server.
#[derive(Debug)]
pub struct KubeStore {
    config: KubeStoreConfig,
    http: Client,
}

impl KubeStore {
    /// Create a store from the given configuration.
    pub fn new(config: KubeStoreConfig) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| StoreError::Auth(format!("invalid bearer token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers);

        if let Some(ca_path) = &config.ca_cert_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to read CA bundle {}: {e}",
                    ca_path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| StoreError::Unavailable(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http })
    }

    /// Create a store from the in-cluster environment.
    pub fn in_cluster() -> Result<Self, StoreError> {
        Self::new(KubeStoreConfig::in_cluster()?)
    }

    fn applications_url(&self, scope: &str) -> String {
        format!(
            "{}/{}/namespaces/{}/applications",
            self.config.api_url.trim_end_matches('/'),
            APPLICATIONS_API,
            scope
        )
    }

    fn application_url(&self, key: &ResourceKey) -> String {
        format!("{}/{}", self.applications_url(&key.scope), key.name)
    }

    /// Map a non-success API server response to a store error.
    async fn error_from_response(key: Option<&ResourceKey>, response: Response) -> StoreError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        match status {
            StatusCode::NOT_FOUND => match key {
                Some(key) => StoreError::not_found(key),
                None => StoreError::InvalidResponse(format!("unexpected 404: {body}")),
            },
            StatusCode::CONFLICT => StoreError::VersionConflict,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                StoreError::Auth(format!("API server returned {status}"))
            }
            s if s.is_server_error() => {
                StoreError::Unavailable(format!("API server returned {status}: {body}"))
            }
            s => StoreError::InvalidResponse(format!("API server returned {s}: {body}")),
        }
    }

    /// GET with bounded retry on transient failures. Only reads are
    /// retried here; writes are conditional and must not be replayed.
    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        key: Option<&ResourceKey>,
    ) -> Result<T, StoreError> {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.http.get(url).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| StoreError::InvalidResponse(e.to_string()));
                }
                Ok(response) => {
                    let err = Self::error_from_response(key, response).await;
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt < self.config.retry_count {
                        tracing::warn!(url = %url, attempt = %attempt, error = %err, "store read failed, retrying");
                    }
                    last_error = Some(err);
                }
                Err(e) => {
                    let err = StoreError::Unavailable(e.to_string());
                    if attempt < self.config.retry_count {
                        tracing::warn!(url = %url, attempt = %attempt, error = %err, "store read failed, retrying");
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| StoreError::Unavailable("request never attempted".into())))
    }

    fn merge_patch_body(patch: &LockPatch, expected_version: Option<&Version>) -> serde_json::Value {
        let annotations = match patch {
            LockPatch::Set {
                holder,
                acquired_at,
            } => json!({
                (ANNOTATION_BOOKED_BY): holder,
                (ANNOTATION_BOOKED_AT): acquired_at
                    .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            }),
            // JSON merge patch removes a field by setting it to null.
            LockPatch::Clear => json!({
                (ANNOTATION_BOOKED_BY): serde_json::Value::Null,
                (ANNOTATION_BOOKED_AT): serde_json::Value::Null,
            }),
        };

        let mut metadata = json!({ "annotations": annotations });
        if let Some(version) = expected_version {
            metadata["resourceVersion"] = json!(version.0);
        }
        json!({ "metadata": metadata })
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(&self, key: &ResourceKey) -> Result<FetchedResource, StoreError> {
        let url = self.application_url(key);
        let object: KubeObject = self.get_json(&url, Some(key)).await?;

        let version = object.metadata.resource_version.ok_or_else(|| {
            StoreError::InvalidResponse(format!("object {key} has no resourceVersion"))
        })?;

        Ok(FetchedResource {
            annotations: object.metadata.annotations,
            version: Version(version),
        })
    }

    async fn list(&self, scope: &str) -> Result<Vec<ResourceEntry>, StoreError> {
        let url = self.applications_url(scope);
        let list: KubeObjectList = self.get_json(&url, None).await?;

        Ok(list
            .items
            .into_iter()
            .map(|object| ResourceEntry {
                name: object.metadata.name,
                annotations: object.metadata.annotations,
            })
            .collect())
    }

    async fn patch(
        &self,
        key: &ResourceKey,
        patch: LockPatch,
        expected_version: Option<&Version>,
    ) -> Result<(), StoreError> {
        let url = self.application_url(key);
        let body = Self::merge_patch_body(&patch, expected_version);

        let response = self
            .http
            .patch(&url)
            .header(CONTENT_TYPE, MERGE_PATCH_CONTENT_TYPE)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::error_from_response(Some(key), response).await)
    }
}

// ============================================================================
// Tests
// ============================================================================
