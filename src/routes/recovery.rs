// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account recovery view: restore a soft-deleted account or leave.

use crate::error::{AppError, Result};
use crate::middleware::auth::{guard_response, wait_response};
use crate::middleware::BrowserContext;
use crate::models::{Plan, UserIdentity};
use crate::services::{recovery, recovery_gate, GuardDecision, Navigation, ProfileSlot, ReconcilePolicy};
use crate::AppState;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/recover", get(recovery_view))
        .route("/recover/restore", post(restore))
        .route("/recover/sign-out", post(sign_out))
}

/// What the recovery view shows.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct RecoveryViewResponse {
    pub user: UserIdentity,
    pub full_name: Option<String>,
    pub plan: Plan,
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Run the recovery gate. Opting in switches the store to hold soft-deleted
/// profiles; any redirect away switches it back.
fn gate(ctx: &BrowserContext) -> GuardDecision {
    let store = ctx.store();
    store.set_policy(ReconcilePolicy::Recovery);

    let decision = recovery_gate(&store.snapshot());
    if matches!(decision, GuardDecision::Redirect(_)) {
        store.set_policy(ReconcilePolicy::Enforce);
    }
    decision
}

async fn recovery_view(Extension(ctx): Extension<BrowserContext>) -> Response {
    if let Some(response) = guard_response(gate(&ctx)) {
        return response;
    }

    let snapshot = ctx.store().snapshot();
    match (snapshot.user, snapshot.profile) {
        (Some(user), ProfileSlot::PendingRecovery(profile)) => Json(RecoveryViewResponse {
            user,
            full_name: profile.full_name,
            plan: profile.plan,
            deleted_at: profile.deleted_at,
        })
        .into_response(),
        // State moved on between the gate and here; let the client retry.
        _ => wait_response(),
    }
}

async fn restore(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<BrowserContext>,
) -> Result<Response> {
    if let Some(response) = guard_response(gate(&ctx)) {
        return Ok(response);
    }

    let navigation = recovery::restore(ctx.store()).await?;
    if navigation.full_reload {
        state
            .contexts
            .reload(&ctx.id)
            .await
            .ok_or_else(|| AppError::NotFound("Browser context".to_string()))?;
    }

    Ok(Json(navigation).into_response())
}

async fn sign_out(Extension(ctx): Extension<BrowserContext>) -> Json<Navigation> {
    let navigation = recovery::sign_out(ctx.store()).await;
    ctx.store().set_policy(ReconcilePolicy::Enforce);
    Json(navigation)
}
