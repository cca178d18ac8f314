// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session and dashboard routes.

use crate::error::Result;
use crate::middleware::BrowserContext;
use crate::models::{Profile, ProfileUpdate, UserIdentity};
use crate::services::{AuthSnapshot, AuthViewState, ReconcilePolicy};
use crate::AppState;
use axum::{
    routing::{get, patch},
    Extension, Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Public session routes (no guard).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/session", get(get_session))
}

/// Routes behind the route guard.
/// The guard middleware is applied in routes/mod.rs for these routes.
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/api/profile", patch(update_profile))
}

// ─── Session ─────────────────────────────────────────────────

/// What the UI may know about the current session. Tokens never leave the
/// server.
#[derive(Debug, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct SessionResponse {
    pub state: AuthViewState,
    pub loading: bool,
    pub user: Option<UserIdentity>,
    /// Active profile only; accounts pending deletion report none.
    pub profile: Option<Profile>,
    /// Last sign-out was forced because the account is scheduled for deletion.
    pub account_pending_deletion: bool,
    pub policy: ReconcilePolicy,
}

impl SessionResponse {
    pub fn new(snapshot: &AuthSnapshot, policy: ReconcilePolicy) -> Self {
        Self {
            state: snapshot.view_state(),
            loading: snapshot.loading,
            user: snapshot.user.clone(),
            profile: snapshot.profile().cloned(),
            account_pending_deletion: snapshot.account_pending_deletion,
            policy,
        }
    }
}

async fn get_session(Extension(ctx): Extension<BrowserContext>) -> Json<SessionResponse> {
    Json(SessionResponse::new(
        &ctx.store().snapshot(),
        ctx.store().policy(),
    ))
}

// ─── Dashboard ───────────────────────────────────────────────

/// Data for the dashboard shell.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct DashboardResponse {
    pub user: UserIdentity,
    /// None when the profile row is missing or could not be loaded.
    pub profile: Option<Profile>,
}

async fn dashboard(Extension(ctx): Extension<BrowserContext>) -> Result<Json<DashboardResponse>> {
    let snapshot = ctx.store().snapshot();
    let user = snapshot
        .user
        .clone()
        .ok_or(crate::error::AuthError::NotAuthenticated)?;

    Ok(Json(DashboardResponse {
        user,
        profile: snapshot.profile().cloned(),
    }))
}

// ─── Profile ─────────────────────────────────────────────────

async fn update_profile(
    Extension(ctx): Extension<BrowserContext>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<SessionResponse>> {
    let snapshot = ctx.store().update_profile(&update).await?;
    Ok(Json(SessionResponse::new(&snapshot, ctx.store().policy())))
}
