//! Booking server assembly
//!
//! Wires the coordinator and its HTTP surface together: shared state,
//! router construction with the optional CORS/trace layers, and server
//! startup with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::store::ResourceStore;

use super::api::create_router;
use super::coordinator::BookingCoordinator;

// ============================================================================
// Server Configuration
// ============================================================================

/// Configuration for the booking server.
#[derive(Debug, Clone)]
pub struct BookingServerConfig {
    /// Server bind address.
    pub bind_address: SocketAddr,

    /// Group whose members may unbook any application.
    pub privileged_group: String,

    /// Namespace used by `/api/list` when none is given.
    pub default_namespace: String,

    /// Enable CORS for the API.
    pub enable_cors: bool,

    /// Enable per-request tracing.
    pub enable_request_logging: bool,
}

impl Default for BookingServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            privileged_group: String::from("admin"),
            default_namespace: String::from("argocd"),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

impl BookingServerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.privileged_group.trim().is_empty() {
            return Err(ServerError::Config(
                "privileged_group must not be empty".into(),
            ));
        }
        if self.default_namespace.trim().is_empty() {
            return Err(ServerError::Config(
                "default_namespace must not be empty".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// App State
// ============================================================================

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Booking coordinator.
    pub coordinator: Arc<BookingCoordinator>,

    /// Server configuration.
    pub config: Arc<BookingServerConfig>,
}

// ============================================================================
// Booking Server
// ============================================================================

/// Main booking server.
pub struct BookingServer {
    config: BookingServerConfig,
    state: AppState,
}

impl BookingServer {
    /// Create a new booking server over the given store.
    pub fn new(
        config: BookingServerConfig,
        store: Arc<dyn ResourceStore>,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        let state = AppState {
            coordinator: Arc::new(BookingCoordinator::new(store)),
            config: Arc::new(config.clone()),
        };

        Ok(Self { config, state })
    }

    /// Get the application state.
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes and configured layers.
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server.
    pub async fn start(&self) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!("Starting booking server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        Ok(())
    }

    /// Start with graceful shutdown.
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!("Starting booking server on {} (with graceful shutdown)", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("Booking server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors.
#[derive(Debug, Clone, Error)]
pub enum ServerError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to bind to the listen address.
    #[error("failed to bind: {0}")]
    Bind(String),

    /// Server runtime error.
    #[error("server error: {0}")]
    Serve(String),
}

// ============================================================================
// Tests
// ============================================================================
