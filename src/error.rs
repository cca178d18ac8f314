// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error types: the auth core's taxonomy and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Errors surfaced by session store operations.
///
/// Messages are shown to the user verbatim, so the identity service's own
/// wording is preserved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Identity service unreachable or the response was unreadable.
    #[error("{0}")]
    Transport(String),

    /// Bad email/password/code.
    #[error("{0}")]
    Credential(String),

    /// Input rejected before calling the identity service.
    #[error("{0}")]
    Validation(String),

    /// Operation needs a signed-in user.
    #[error("Not signed in")]
    NotAuthenticated,

    /// Any other rejection from the identity service.
    #[error("{0}")]
    Backend(String),
}

impl AuthError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        // First message wins; forms show one error at a time.
        let message = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid {field}"))
                })
            })
            .next()
            .unwrap_or_else(|| "Invalid input".to_string());
        Self::Validation(message)
    }
}

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Sign-in found the account scheduled for deletion and ended the session.
    #[error("Account scheduled for deletion")]
    AccountPendingDeletion,

    #[error("Too many requests: retry in {0}s")]
    Cooldown(u64),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Auth(err) => {
                let (status, code) = match err {
                    AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                    AuthError::Credential(_) => (StatusCode::UNAUTHORIZED, "credential_error"),
                    AuthError::NotAuthenticated => (StatusCode::UNAUTHORIZED, "unauthorized"),
                    AuthError::Transport(msg) => {
                        tracing::error!(error = %msg, "Identity service unreachable");
                        (StatusCode::BAD_GATEWAY, "transport_error")
                    }
                    AuthError::Backend(_) => (StatusCode::BAD_GATEWAY, "identity_error"),
                };
                (status, code, Some(err.to_string()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::AccountPendingDeletion => (
                StatusCode::FORBIDDEN,
                "account_pending_deletion",
                Some("This account is scheduled for deletion. Sign in again to restore it.".to_string()),
            ),
            AppError::Cooldown(secs) => (
                StatusCode::TOO_MANY_REQUESTS,
                "cooldown",
                Some(format!("Please wait {secs}s before requesting another code")),
            ),
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
