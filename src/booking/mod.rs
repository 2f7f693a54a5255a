//! Booking coordinator and its HTTP surface
//!
//! This module owns the exclusive-locking decision logic for ArgoCD
//! Applications and exposes it over a small REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │           Booking Server            │
//! │                                     │
//! │  ┌──────────────────────────────┐   │
//! │  │          REST API            │   │
//! │  │  GET  /api/status            │   │
//! │  │  POST /api/book              │   │
//! │  │  POST /api/unbook            │   │
//! │  │  GET  /api/list              │   │
//! │  │  GET  /healthz               │   │
//! │  └──────────────────────────────┘   │
//! │                 │                   │
//! │  ┌──────────────────────────────┐   │
//! │  │     Booking Coordinator      │   │
//! │  │  - query / acquire / release │   │
//! │  │  - conditional writes        │   │
//! │  │  - privileged override       │   │
//! │  └──────────────────────────────┘   │
//! └─────────────────────────────────────┘
//!                   │
//!                   ▼
//!           ResourceStore trait
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use bookd::booking::{BookingServer, BookingServerConfig};
//!
//! let server = BookingServer::new(config, store)?;
//! server.start().await?;
//! ```

pub mod api;
pub mod coordinator;
pub mod server;

// Re-export main types
pub use coordinator::{BookingCoordinator, BookingError, LockRecord, LockState};
pub use server::{BookingServer, BookingServerConfig};
