// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication routes: email/password, verification codes, password
//! recovery links and OAuth.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Extension, Json, Router,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use super::api::SessionResponse;
use crate::backend::OAuthProvider;
use crate::error::{AppError, Result};
use crate::middleware::BrowserContext;
use crate::services::guards::{
    safe_next, sign_in_redirect, LANDING_PATH, RECOVERY_PATH, UPDATE_PASSWORD_PATH,
};
use crate::services::{AuthSnapshot, ReconcilePolicy, SessionStore};
use crate::AppState;

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

type HmacSha256 = Hmac<Sha256>;

/// OAuth round trips older than this are refused.
const OAUTH_STATE_MAX_AGE_MS: u128 = 10 * 60 * 1000;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/verify", post(verify))
        .route("/auth/resend", post(resend))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/sign-out", post(sign_out))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/update-password", post(update_password))
        .route("/auth/recovery", get(recovery_link))
        .route("/auth/oauth/{provider}", get(oauth_start))
        .route("/auth/callback", get(oauth_callback))
}

// ─── Request / response bodies ───────────────────────────────

#[derive(Deserialize)]
pub struct SignUpRequest {
    email: String,
    password: String,
    full_name: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    email: String,
    code: String,
}

#[derive(Deserialize)]
pub struct EmailRequest {
    email: String,
}

#[derive(Deserialize)]
pub struct SignInRequest {
    email: String,
    password: String,
    /// Where to go after signing in
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
pub struct PasswordRequest {
    password: String,
}

/// Acknowledgement for operations that only trigger an email.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct EmailSentResponse {
    pub email: String,
    pub message: String,
}

/// Result of an operation that changes the session.
#[derive(Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct AuthResponse {
    pub redirect_to: String,
    pub session: SessionResponse,
}

// ─── Email / password ────────────────────────────────────────

async fn sign_up(
    Extension(ctx): Extension<BrowserContext>,
    Json(body): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<EmailSentResponse>)> {
    ctx.store()
        .sign_up(&body.email, &body.password, &body.full_name)
        .await?;
    ctx.auth.record_send(&body.email);

    Ok((
        StatusCode::ACCEPTED,
        Json(EmailSentResponse {
            email: body.email.trim().to_ascii_lowercase(),
            message: "Check your email for a verification code".to_string(),
        }),
    ))
}

async fn verify(
    Extension(ctx): Extension<BrowserContext>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<AuthResponse>> {
    let snapshot = ctx.store().verify_otp(&body.email, &body.code).await?;
    after_sign_in(ctx.store(), &snapshot, None).map(Json)
}

async fn resend(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<BrowserContext>,
    Json(body): Json<EmailRequest>,
) -> Result<Json<EmailSentResponse>> {
    ctx.auth
        .check_resend(&body.email, state.config.resend_cooldown)
        .map_err(AppError::Cooldown)?;

    ctx.store().resend_otp(&body.email).await?;

    Ok(Json(EmailSentResponse {
        email: body.email.trim().to_ascii_lowercase(),
        message: "A new code is on its way".to_string(),
    }))
}

async fn sign_in(
    Extension(ctx): Extension<BrowserContext>,
    Json(body): Json<SignInRequest>,
) -> Result<Json<AuthResponse>> {
    let next = safe_next(body.next.as_deref());
    let store = ctx.store();

    // The profile is reconciled inside sign-in, so the policy goes first.
    let previous = store.policy();
    store.set_policy(policy_for(&next));
    let snapshot = match store.sign_in(&body.email, &body.password).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            store.set_policy(previous);
            return Err(err.into());
        }
    };
    after_sign_in(store, &snapshot, Some(next)).map(Json)
}

async fn sign_out(Extension(ctx): Extension<BrowserContext>) -> Json<AuthResponse> {
    ctx.store().sign_out().await;
    ctx.store().set_policy(ReconcilePolicy::Enforce);

    Json(AuthResponse {
        redirect_to: LANDING_PATH.to_string(),
        session: SessionResponse::new(&ctx.store().snapshot(), ctx.store().policy()),
    })
}

// ─── Password recovery ───────────────────────────────────────

async fn reset_password(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<BrowserContext>,
    Json(body): Json<EmailRequest>,
) -> Result<Json<EmailSentResponse>> {
    let redirect_to = format!("{}/auth/recovery", state.config.site_url);
    ctx.store().reset_password(&body.email, &redirect_to).await?;

    // Same answer whether or not the account exists.
    Ok(Json(EmailSentResponse {
        email: body.email.trim().to_ascii_lowercase(),
        message: "If an account exists, a reset link has been sent".to_string(),
    }))
}

#[derive(Deserialize)]
pub struct RecoveryLinkParams {
    #[serde(default)]
    token_hash: String,
}

/// Landing point of the emailed reset link.
async fn recovery_link(
    Extension(ctx): Extension<BrowserContext>,
    Query(params): Query<RecoveryLinkParams>,
) -> Result<Redirect> {
    ctx.store()
        .complete_password_recovery(&params.token_hash)
        .await?;
    Ok(Redirect::to(UPDATE_PASSWORD_PATH))
}

async fn update_password(
    Extension(ctx): Extension<BrowserContext>,
    Json(body): Json<PasswordRequest>,
) -> Result<StatusCode> {
    ctx.store().update_password(&body.password).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── OAuth ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct OAuthStartParams {
    #[serde(default)]
    next: Option<String>,
}

/// Start OAuth flow - redirect to the provider via the identity service.
async fn oauth_start(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<BrowserContext>,
    Path(provider): Path<String>,
    Query(params): Query<OAuthStartParams>,
) -> Result<Redirect> {
    let provider: OAuthProvider = provider.parse()?;
    let next = safe_next(params.next.as_deref());

    let signed_state = sign_state(&next, &state.config.oauth_state_key)?;
    let callback_url = format!(
        "{}/auth/callback?state={}",
        state.config.site_url, signed_state
    );

    ctx.store().set_policy(policy_for(&next));
    let auth_url = ctx
        .store()
        .sign_in_with_oauth(provider, &callback_url)
        .await?;

    tracing::info!(provider = provider.as_str(), next = %next, "Starting OAuth flow");
    Ok(Redirect::to(&auth_url))
}

#[derive(Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth callback - exchange the code and continue to `next`.
async fn oauth_callback(
    Extension(ctx): Extension<BrowserContext>,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect> {
    let next = verify_and_decode_state(&params.state, &state.config.oauth_state_key)
        .unwrap_or_else(|| {
            tracing::warn!("Invalid or expired OAuth state, continuing to dashboard");
            safe_next(None)
        });

    if let Some(error) = params.error {
        let message = params.error_description.unwrap_or(error);
        tracing::warn!(error = %message, "OAuth error from provider");
        return Ok(Redirect::to(&format!(
            "{}&error={}",
            sign_in_redirect(&next),
            urlencoding::encode(&message)
        )));
    }

    let code = params.code.unwrap_or_default();
    let snapshot = ctx.store().complete_oauth(&code).await?;

    if snapshot.account_pending_deletion {
        return Ok(Redirect::to(&sign_in_redirect(RECOVERY_PATH)));
    }
    Ok(Redirect::to(&next))
}

// ─── Helpers ─────────────────────────────────────────────────

/// Only the recovery view holds soft-deleted profiles.
fn policy_for(next: &str) -> ReconcilePolicy {
    let path = next.split(['?', '#']).next().unwrap_or(next);
    if path == RECOVERY_PATH {
        ReconcilePolicy::Recovery
    } else {
        ReconcilePolicy::Enforce
    }
}

fn after_sign_in(
    store: &SessionStore,
    snapshot: &AuthSnapshot,
    next: Option<String>,
) -> Result<AuthResponse> {
    if snapshot.account_pending_deletion {
        store.set_policy(ReconcilePolicy::Enforce);
        return Err(AppError::AccountPendingDeletion);
    }
    Ok(AuthResponse {
        redirect_to: next.unwrap_or_else(|| safe_next(None)),
        session: SessionResponse::new(snapshot, store.policy()),
    })
}

/// Sign `next` into an OAuth state parameter.
///
/// Format before base64: `next|timestamp_hex|signature_hex`.
pub fn sign_state(next: &str, secret: &[u8]) -> Result<String> {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("System time error: {}", e)))?
        .as_millis();
    sign_state_at(next, timestamp, secret)
}

fn sign_state_at(next: &str, timestamp_ms: u128, secret: &[u8]) -> Result<String> {
    let payload = format!("{}|{:x}", next, timestamp_ms);

    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("HMAC init failed: {}", e)))?;
    mac.update(payload.as_bytes());
    let signature = mac.finalize().into_bytes();

    let signed = format!("{}|{}", payload, hex::encode(signature));
    Ok(URL_SAFE_NO_PAD.encode(signed.as_bytes()))
}

/// Verify HMAC signature and age, then decode `next` from the OAuth state.
pub fn verify_and_decode_state(state: &str, secret: &[u8]) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(state).ok()?;
    let state_str = String::from_utf8(bytes).ok()?;

    // Split from the right so `next` may itself contain '|'.
    let mut parts = state_str.rsplitn(3, '|');
    let signature_hex = parts.next()?;
    let timestamp_hex = parts.next()?;
    let next = parts.next()?;

    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(format!("{}|{}", next, timestamp_hex).as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if !bool::from(signature_hex.as_bytes().ct_eq(expected.as_bytes())) {
        tracing::error!("OAuth state signature mismatch! Potential tampering.");
        return None;
    }

    let issued_at = u128::from_str_radix(timestamp_hex, 16).ok()?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_millis();
    if now.saturating_sub(issued_at) > OAUTH_STATE_MAX_AGE_MS {
        tracing::warn!("OAuth state expired");
        return None;
    }

    Some(safe_next(Some(next)))
}
