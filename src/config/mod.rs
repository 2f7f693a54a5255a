//! Configuration management for the booking backend
//!
//! Configuration is loaded from a TOML file or from `BOOKD_*` environment
//! variables, validated once at startup, and then handed to the server
//! and store constructors. The privileged group and default namespace are
//! deliberately configuration values, not compiled-in constants.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::booking::BookingServerConfig;
use crate::store::{KubeStore, KubeStoreConfig, MemoryStore, ResourceStore};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration.
    pub server: ServerConfig,

    /// Booking policy configuration.
    pub booking: BookingConfig,

    /// Resource store configuration.
    pub store: StoreConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP listener.
    pub bind_address: SocketAddr,

    /// Enable CORS for the API.
    pub enable_cors: bool,

    /// Enable per-request tracing.
    pub enable_request_logging: bool,
}

/// Booking policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Group whose members may unbook any application.
    pub privileged_group: String,

    /// Namespace used by `/api/list` when none is given.
    pub default_namespace: String,
}

/// Which store backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Kubernetes API server (production).
    Kube,

    /// In-memory store (local development, tests).
    Memory,
}

/// Resource store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend.
    pub backend: StoreBackend,

    /// Explicit API server URL. When absent the in-cluster environment is
    /// used.
    pub api_url: Option<String>,

    /// Explicit bearer token. Only meaningful with `api_url`.
    pub token: Option<String>,

    /// PEM bundle to trust for the API server's TLS certificate.
    pub ca_cert_path: Option<PathBuf>,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Retry count for transiently failing reads.
    pub retry_count: u32,

    /// Delay between retries in milliseconds.
    pub retry_delay_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (text, json).
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // The original deployment configured only the port; honor PORT as
        // a fallback for the full bind address.
        let bind_address = std::env::var("BOOKD_BIND_ADDRESS")
            .ok()
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .or_else(|| {
                std::env::var("PORT")
                    .ok()
                    .and_then(|p| p.parse::<u16>().ok())
                    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
            })
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let enable_cors = std::env::var("BOOKD_ENABLE_CORS")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        let enable_request_logging = std::env::var("BOOKD_REQUEST_LOGGING")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(true);

        let privileged_group =
            std::env::var("BOOKD_PRIVILEGED_GROUP").unwrap_or_else(|_| String::from("admin"));

        let default_namespace =
            std::env::var("BOOKD_DEFAULT_NAMESPACE").unwrap_or_else(|_| String::from("argocd"));

        let backend = match std::env::var("BOOKD_STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Kube,
        };

        let api_url = std::env::var("BOOKD_KUBE_API_URL").ok();
        let token = std::env::var("BOOKD_KUBE_TOKEN").ok();
        let ca_cert_path = std::env::var("BOOKD_KUBE_CA_CERT").ok().map(PathBuf::from);

        let request_timeout_secs = std::env::var("BOOKD_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        let retry_count = std::env::var("BOOKD_RETRY_COUNT")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2);

        let retry_delay_ms = std::env::var("BOOKD_RETRY_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(500);

        let level = std::env::var("BOOKD_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));
        let format = std::env::var("BOOKD_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            server: ServerConfig {
                bind_address,
                enable_cors,
                enable_request_logging,
            },
            booking: BookingConfig {
                privileged_group,
                default_namespace,
            },
            store: StoreConfig {
                backend,
                api_url,
                token,
                ca_cert_path,
                request_timeout_secs,
                retry_count,
                retry_delay_ms,
            },
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.booking.privileged_group.trim().is_empty() {
            anyhow::bail!("booking.privileged_group must not be empty");
        }

        if self.booking.default_namespace.trim().is_empty() {
            anyhow::bail!("booking.default_namespace must not be empty");
        }

        if self.store.request_timeout_secs == 0 {
            anyhow::bail!("store.request_timeout_secs must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "logging.format must be 'text' or 'json', got '{}'",
                self.logging.format
            );
        }

        if self.store.backend == StoreBackend::Memory && self.store.api_url.is_some() {
            anyhow::bail!("store.api_url has no effect with the memory backend");
        }

        Ok(())
    }

    /// Assemble the booking server configuration.
    #[must_use]
    pub fn server_config(&self) -> BookingServerConfig {
        BookingServerConfig {
            bind_address: self.server.bind_address,
            privileged_group: self.booking.privileged_group.clone(),
            default_namespace: self.booking.default_namespace.clone(),
            enable_cors: self.server.enable_cors,
            enable_request_logging: self.server.enable_request_logging,
        }
    }

    /// Assemble the Kubernetes store configuration for an explicit API
    /// URL. In-cluster setups leave `api_url` unset and use
    /// [`KubeStoreConfig::in_cluster`] instead.
    #[must_use]
    pub fn kube_store_config(&self, api_url: &str) -> KubeStoreConfig {
        let mut config = KubeStoreConfig::new(api_url)
            .with_timeout(self.request_timeout())
            .with_retry_count(self.store.retry_count)
            .with_retry_delay(Duration::from_millis(self.store.retry_delay_ms));
        if let Some(token) = &self.store.token {
            config = config.with_token(token.clone());
        }
        config.ca_cert_path = self.store.ca_cert_path.clone();
        config
    }

    /// Get request timeout as Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.store.request_timeout_secs)
    }

    /// Construct the configured store backend.
    ///
    /// The kube backend uses the explicit `store.api_url` when set and
    /// falls back to in-cluster discovery otherwise.
    pub fn build_store(&self) -> crate::error::Result<Arc<dyn ResourceStore>> {
        match self.store.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store; lock state will not survive restarts");
                Ok(Arc::new(MemoryStore::new()))
            }
            StoreBackend::Kube => match &self.store.api_url {
                Some(api_url) => Ok(Arc::new(KubeStore::new(self.kube_store_config(api_url))?)),
                None => Ok(Arc::new(KubeStore::in_cluster()?)),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
                enable_cors: true,
                enable_request_logging: true,
            },
            booking: BookingConfig {
                privileged_group: String::from("admin"),
                default_namespace: String::from("argocd"),
            },
            store: StoreConfig {
                backend: StoreBackend::Kube,
                api_url: None,
                token: None,
                ca_cert_path: None,
                request_timeout_secs: 10,
                retry_count: 2,
                retry_delay_ms: 500,
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_privileged_group_is_invalid() {
        let mut config = Config::default();
        config.booking.privileged_group = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_format_is_invalid() {
        let mut config = Config::default();
        config.logging.format = String::from("xml");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_backend_rejects_api_url() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        config.store.api_url = Some(String::from("https://k8s.example"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_server_config_assembly() {
        let mut config = Config::default();
        config.booking.privileged_group = String::from("platform-admins");
        config.booking.default_namespace = String::from("argo-prod");

        let server = config.server_config();
        assert_eq!(server.privileged_group, "platform-admins");
        assert_eq!(server.default_namespace, "argo-prod");
        assert_eq!(server.bind_address.port(), 8080);
    }

    #[test]
    fn test_kube_store_config_assembly() {
        let mut config = Config::default();
        config.store.request_timeout_secs = 3;
        config.store.token = Some(String::from("secret"));

        let kube = config.kube_store_config("https://k8s.example:6443");
        assert_eq!(kube.api_url, "https://k8s.example:6443");
        assert_eq!(kube.timeout, Duration::from_secs(3));
        assert_eq!(kube.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
            [server]
            bind_address = "127.0.0.1:9090"
            enable_cors = false
            enable_request_logging = true

            [booking]
            privileged_group = "sre"
            default_namespace = "argocd"

            [store]
            backend = "kube"
            request_timeout_secs = 5
            retry_count = 1
            retry_delay_ms = 100

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address.port(), 9090);
        assert!(!config.server.enable_cors);
        assert_eq!(config.booking.privileged_group, "sre");
        assert_eq!(config.store.backend, StoreBackend::Kube);
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_build_store_memory() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Memory;
        assert!(config.build_store().is_ok());
    }

    #[test]
    fn test_build_store_kube_with_explicit_url() {
        let mut config = Config::default();
        config.store.api_url = Some(String::from("https://k8s.example:6443"));
        config.store.token = Some(String::from("secret"));
        assert!(config.build_store().is_ok());
    }

    #[test]
    fn test_build_store_surfaces_store_errors() {
        let mut config = Config::default();
        config.store.api_url = Some(String::from("https://k8s.example:6443"));
        config.store.ca_cert_path = Some(PathBuf::from("/nonexistent/ca.pem"));

        let err = config.build_store().unwrap_err();
        assert!(matches!(err, crate::error::Error::Store(_)));
        assert_eq!(err.category(), crate::error::ErrorCategory::Network);
    }
}
