//! bookd - Booking backend for ArgoCD Applications
//!
//! Exclusive, single-owner locking ("booking") of ArgoCD `Application`
//! resources. The lock's truth lives entirely in two metadata annotations
//! on the Application itself; this service keeps no durable state and any
//! number of replicas can run behind a load balancer.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`booking`] - Booking coordinator, REST API, and server assembly
//! - [`store`] - Resource store abstraction (Kubernetes, in-memory)
//! - [`error`] - Unified error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bookd::booking::{BookingServer, BookingServerConfig};
//! use bookd::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let server = BookingServer::new(BookingServerConfig::default(), store)?;
//!     server.start().await?;
//!     Ok(())
//! }
//! ```

pub mod booking;
pub mod config;
pub mod error;
pub mod store;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::booking::{
        BookingCoordinator, BookingError, BookingServer, BookingServerConfig, LockRecord,
        LockState,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::store::{ResourceKey, ResourceStore, StoreError};
}
