//! REST API handlers for the booking server
//!
//! The upstream proxy (ArgoCD's extension gateway) resolves identity and
//! group membership before requests reach us; this layer only parses the
//! trusted headers, derives the privilege flag against the configured
//! group, and maps coordinator outcomes to response codes.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::store::ResourceKey;

use super::coordinator::{BookingError, LockState};
use super::server::AppState;

/// Header carrying the resource identity as `namespace:appname`.
pub const HEADER_APP_NAME: &str = "Argocd-Application-Name";

/// Header carrying the caller's identity.
pub const HEADER_USERNAME: &str = "Argocd-Username";

/// Header carrying the caller's comma-separated group list.
pub const HEADER_USER_GROUPS: &str = "Argocd-User-Groups";

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `GET /api/status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub booked: bool,
    #[serde(rename = "bookedBy", skip_serializing_if = "Option::is_none")]
    pub booked_by: Option<String>,
    #[serde(rename = "bookedAt", skip_serializing_if = "Option::is_none")]
    pub booked_at: Option<String>,
}

/// Body of successful `POST /api/book` / `POST /api/unbook`.
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub status: &'static str,
}

/// Error body for every failure response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Query parameters of `GET /api/list`.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub namespace: Option<String>,
}

// ============================================================================
// Header Parsing
// ============================================================================

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

/// Parse the application header into a resource key.
fn parse_app_header(headers: &HeaderMap) -> Result<ResourceKey, Response> {
    let raw = headers
        .get(HEADER_APP_NAME)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    ResourceKey::parse(raw).ok_or_else(|| {
        bad_request(format!(
            "missing or invalid {HEADER_APP_NAME} header (expected namespace:appname)"
        ))
    })
}

/// Extract the caller identity, required for book/unbook.
fn parse_username(headers: &HeaderMap) -> Result<String, Response> {
    match headers.get(HEADER_USERNAME).and_then(|v| v.to_str().ok()) {
        Some(username) if !username.is_empty() => Ok(username.to_string()),
        _ => Err(bad_request(format!("missing {HEADER_USERNAME} header"))),
    }
}

/// Whether the caller's group list contains the configured privileged
/// group. Absent header means unprivileged.
fn is_privileged(headers: &HeaderMap, privileged_group: &str) -> bool {
    headers
        .get(HEADER_USER_GROUPS)
        .and_then(|v| v.to_str().ok())
        .map(|groups| groups.split(',').any(|g| g.trim() == privileged_group))
        .unwrap_or(false)
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Deterministic mapping from coordinator outcomes to responses.
///
/// Conflict and Forbidden bodies surface the holder identity; store and
/// internal failures are logged and answered with a generic message so
/// raw transport errors never leak to clients.
fn booking_error_response(context: &str, err: BookingError) -> Response {
    match &err {
        BookingError::Conflict { .. } => {
            (StatusCode::CONFLICT, Json(ErrorResponse::new(err.to_string()))).into_response()
        }
        BookingError::Forbidden { .. } => {
            (StatusCode::FORBIDDEN, Json(ErrorResponse::new(err.to_string()))).into_response()
        }
        BookingError::NotFound { .. } => {
            (StatusCode::NOT_FOUND, Json(ErrorResponse::new(err.to_string()))).into_response()
        }
        BookingError::Store(source) => {
            tracing::error!(error = %source, "{context}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(format!("failed to {context}"))),
            )
                .into_response()
        }
    }
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/book", post(book))
        .route("/api/unbook", post(unbook))
        .route("/api/list", get(list))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Booking status of a single application.
async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let key = match parse_app_header(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };

    match state.coordinator.query(&key).await {
        Ok(LockState::Unlocked) => Json(StatusResponse {
            booked: false,
            booked_by: None,
            booked_at: None,
        })
        .into_response(),
        Ok(LockState::Held {
            holder,
            acquired_at,
        }) => Json(StatusResponse {
            booked: true,
            booked_by: Some(holder),
            booked_at: acquired_at.map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
        })
        .into_response(),
        Err(err) => booking_error_response("get booking status", err),
    }
}

/// Book an application for the requesting user.
async fn book(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let key = match parse_app_header(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let username = match parse_username(&headers) {
        Ok(username) => username,
        Err(response) => return response,
    };

    match state.coordinator.acquire(&key, &username).await {
        Ok(()) => Json(ActionResponse { status: "booked" }).into_response(),
        Err(err) => booking_error_response("book application", err),
    }
}

/// Unbook an application. Privileged callers may unbook any holder.
async fn unbook(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let key = match parse_app_header(&headers) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let username = match parse_username(&headers) {
        Ok(username) => username,
        Err(response) => return response,
    };
    let privileged = is_privileged(&headers, &state.config.privileged_group);

    match state.coordinator.release(&key, &username, privileged).await {
        Ok(()) => Json(ActionResponse { status: "unbooked" }).into_response(),
        Err(err) => booking_error_response("unbook application", err),
    }
}

/// All currently booked applications in a namespace. Always an array,
/// never null.
async fn list(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let namespace = params
        .namespace
        .unwrap_or_else(|| state.config.default_namespace.clone());

    match state.coordinator.list_held(&namespace).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => booking_error_response("list bookings", err),
    }
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}

// ============================================================================
// Tests
// ============================================================================
