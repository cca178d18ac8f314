// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Browser context resolution and route protection middleware.

use crate::error::{AppError, AuthError};
use crate::services::guards::RECOVERY_PATH;
use crate::services::{route_guard, AuthContext, AuthViewState, GuardDecision, SessionStore};
use crate::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde_json::json;
use std::sync::Arc;

/// Cookie carrying the browser context ID.
pub const CONTEXT_COOKIE: &str = "qm_ctx";

/// The auth core mounted for the calling browser.
#[derive(Clone)]
pub struct BrowserContext {
    pub id: String,
    pub auth: Arc<AuthContext>,
}

impl BrowserContext {
    pub fn store(&self) -> &SessionStore {
        self.auth.store()
    }
}

/// Middleware that attaches the caller's `BrowserContext`, mounting one
/// (and setting its cookie) on first visit.
pub async fn resolve_context(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = jar.get(CONTEXT_COOKIE).map(|c| c.value().to_string());
    let (id, auth) = state.contexts.get_or_mount(presented.as_deref()).await?;
    let is_new = presented.as_deref() != Some(id.as_str());

    request.extensions_mut().insert(BrowserContext {
        id: id.clone(),
        auth,
    });

    let mut response = next.run(request).await;

    if is_new {
        let cookie = context_cookie(id, !state.config.is_local());
        let value = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid cookie header: {e}")))?;
        response.headers_mut().append(header::SET_COOKIE, value);
    }

    Ok(response)
}

pub fn context_cookie(id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((CONTEXT_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Middleware enforcing the route guard on protected routes.
///
/// A session whose profile is held for recovery is sent back to the
/// recovery view. API callers get a 401 or 403 instead of a redirect.
pub async fn require_session(
    Extension(ctx): Extension<BrowserContext>,
    request: Request,
    next: Next,
) -> Response {
    let requested = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let is_api = request.uri().path().starts_with("/api/");

    let snapshot = ctx.store().snapshot();
    let mut decision = route_guard(&snapshot, &requested);
    if decision == GuardDecision::Render
        && snapshot.view_state() == AuthViewState::AuthenticatedPendingRecovery
    {
        if is_api {
            return AppError::AccountPendingDeletion.into_response();
        }
        decision = GuardDecision::Redirect(RECOVERY_PATH.to_string());
    }

    if matches!(decision, GuardDecision::Redirect(_)) && is_api {
        return AppError::Auth(AuthError::NotAuthenticated).into_response();
    }

    match guard_response(decision) {
        Some(response) => response,
        None => next.run(request).await,
    }
}

/// HTTP rendering of a non-render guard decision.
///
/// `Wait` becomes 202 with `Retry-After`, `Redirect` a 303. `Render` has no
/// response of its own.
pub fn guard_response(decision: GuardDecision) -> Option<Response> {
    match decision {
        GuardDecision::Wait => Some(wait_response()),
        GuardDecision::Redirect(location) => Some(Redirect::to(&location).into_response()),
        GuardDecision::Render => None,
    }
}

/// 202 asking the client to poll again shortly.
pub fn wait_response() -> Response {
    (
        StatusCode::ACCEPTED,
        [(header::RETRY_AFTER, "1")],
        Json(json!({ "status": "waiting" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_response() {
        let response = guard_response(GuardDecision::Wait).unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn test_redirect_response() {
        let response = guard_response(GuardDecision::Redirect("/sign-in?next=%2Fdashboard".into())).unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "/sign-in?next=%2Fdashboard"
        );
        assert!(guard_response(GuardDecision::Render).is_none());
    }

    #[test]
    fn test_context_cookie_attributes() {
        let cookie = context_cookie("abc".to_string(), true);
        let header = cookie.to_string();
        assert!(header.starts_with("qm_ctx=abc"));
        assert!(header.contains("HttpOnly"));
        assert!(header.contains("SameSite=Lax"));
        assert!(header.contains("Secure"));
        assert!(header.contains("Path=/"));
    }
}
