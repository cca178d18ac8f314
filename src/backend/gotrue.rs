// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! GoTrue/PostgREST client for one browser context.
//!
//! Handles:
//! - Password, sign-up code, recovery-link and PKCE OAuth sign-in
//! - Token refresh shortly before expiry
//! - Profile reads/writes and account recovery through the record API

use super::{AuthEventBus, IdentityBackend, OAuthProvider};
use crate::config::Config;
use crate::error::AuthError;
use crate::models::{AuthEvent, AuthEventKind, Profile, ProfileUpdate, Session, UserIdentity};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex};

/// Refresh the access token when it expires within this window.
const REFRESH_MARGIN_SECS: i64 = 60;
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// How a non-2xx status should be classified.
#[derive(Clone, Copy)]
enum ErrorClass {
    /// Credential endpoints: 4xx means bad email/password/code.
    Credential,
    Other,
}

/// GoTrue client holding one browser context's session.
pub struct GoTrueBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    session: Mutex<Option<Session>>,
    /// PKCE verifier for an OAuth flow started from this context
    pkce_verifier: Mutex<Option<String>>,
    events: AuthEventBus,
}

impl GoTrueBackend {
    /// Create a client sharing the given HTTP connection pool.
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            base_url: config.identity_url.clone(),
            anon_key: config.identity_anon_key.clone(),
            session: Mutex::new(None),
            pkce_verifier: Mutex::new(None),
            events: AuthEventBus::new(),
        }
    }

    /// Build the shared HTTP client used by every context.
    pub fn http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .context("failed building identity HTTP client")
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path)
    }

    /// Replace the held session and announce it.
    async fn set_session(&self, session: Option<Session>, kind: AuthEventKind) {
        *self.session.lock().await = session.clone();
        self.events.publish(AuthEvent::new(kind, session));
    }

    async fn access_token(&self) -> Result<String, AuthError> {
        self.current_session()
            .await?
            .map(|s| s.access_token)
            .ok_or(AuthError::NotAuthenticated)
    }

    async fn post_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(self.auth_url("token"))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let token: TokenResponse = check_response_json(response, ErrorClass::Credential).await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn post_verify(&self, body: serde_json::Value) -> Result<Session, AuthError> {
        let response = self
            .http
            .post(self.auth_url("verify"))
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let token: TokenResponse = check_response_json(response, ErrorClass::Credential).await?;
        Ok(token.into_session(Utc::now()))
    }
}

#[async_trait]
impl IdentityBackend for GoTrueBackend {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.clone() else {
            return Ok(None);
        };

        if !session.expires_within(Utc::now(), Duration::seconds(REFRESH_MARGIN_SECS)) {
            return Ok(Some(session));
        }

        match self
            .post_token(
                "refresh_token",
                json!({ "refresh_token": session.refresh_token }),
            )
            .await
        {
            Ok(fresh) => {
                *guard = Some(fresh.clone());
                drop(guard);
                tracing::debug!(user_id = %fresh.user.id, "Access token refreshed");
                self.events
                    .publish(AuthEvent::new(AuthEventKind::TokenRefreshed, Some(fresh.clone())));
                Ok(Some(fresh))
            }
            Err(AuthError::Transport(msg)) => Err(AuthError::Transport(msg)),
            Err(err) => {
                // Refresh token revoked or expired: the session is gone.
                tracing::info!(error = %err, "Refresh rejected, dropping session");
                *guard = None;
                drop(guard);
                self.events.publish(AuthEvent::signed_out());
                Ok(None)
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "full_name": full_name },
            }))
            .send()
            .await
            .map_err(transport)?;

        // Email confirmation is required, so no session is adopted here.
        check_response(response, ErrorClass::Credential).await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let session = self
            .post_verify(json!({ "type": "signup", "email": email, "token": code }))
            .await?;
        self.set_session(Some(session), AuthEventKind::SignedIn).await;
        Ok(())
    }

    async fn resend_otp(&self, email: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.auth_url("resend"))
            .header("apikey", &self.anon_key)
            .json(&json!({ "type": "signup", "email": email }))
            .send()
            .await
            .map_err(transport)?;

        check_response(response, ErrorClass::Credential).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let session = self
            .post_token("password", json!({ "email": email, "password": password }))
            .await?;
        self.set_session(Some(session), AuthEventKind::SignedIn).await;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.session.lock().await.take();
        self.events.publish(AuthEvent::signed_out());

        let Some(session) = previous else {
            return Ok(());
        };

        let response = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await
            .map_err(transport)?;

        check_response(response, ErrorClass::Other).await
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(self.auth_url("recover"))
            .query(&[("redirect_to", redirect_to)])
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email }))
            .send()
            .await
            .map_err(transport)?;

        check_response(response, ErrorClass::Credential).await
    }

    async fn verify_recovery(&self, token_hash: &str) -> Result<(), AuthError> {
        let session = self
            .post_verify(json!({ "type": "recovery", "token_hash": token_hash }))
            .await?;
        self.set_session(Some(session), AuthEventKind::PasswordRecovery)
            .await;
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .put(self.auth_url("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&token)
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(transport)?;

        check_response(response, ErrorClass::Credential).await?;

        let session = self.session.lock().await.clone();
        self.events
            .publish(AuthEvent::new(AuthEventKind::UserUpdated, session));
        Ok(())
    }

    async fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError> {
        let (verifier, challenge) = pkce_pair()?;
        *self.pkce_verifier.lock().await = Some(verifier);

        Ok(format!(
            "{}?provider={}&redirect_to={}&code_challenge={}&code_challenge_method=s256",
            self.auth_url("authorize"),
            provider.as_str(),
            urlencoding::encode(redirect_to),
            challenge
        ))
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<(), AuthError> {
        let verifier = self.pkce_verifier.lock().await.take().ok_or_else(|| {
            AuthError::validation("Sign-in was not started from this browser")
        })?;

        let session = self
            .post_token(
                "pkce",
                json!({ "auth_code": code, "code_verifier": verifier }),
            )
            .await?;
        self.set_session(Some(session), AuthEventKind::SignedIn).await;
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.rest_url("profiles"))
            .query(&[("id", format!("eq.{user_id}")), ("select", "*".to_string())])
            .header("apikey", &self.anon_key)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(transport)?;

        let rows: Vec<Profile> = check_response_json(response, ErrorClass::Other).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<(), AuthError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .patch(self.rest_url("profiles"))
            .query(&[("id", format!("eq.{user_id}"))])
            .header("apikey", &self.anon_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(&token)
            .json(update)
            .send()
            .await
            .map_err(transport)?;

        check_response(response, ErrorClass::Other).await
    }

    async fn recover_account(&self) -> Result<(), AuthError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.rest_url("rpc/recover_account"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(transport)?;

        check_response(response, ErrorClass::Other).await
    }
}

// ─── Wire types ──────────────────────────────────────────────

/// Token grant / verify response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    /// Unix timestamp
    #[serde(default)]
    expires_at: Option<i64>,
    user: GoTrueUser,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(|| {
                now + Duration::seconds(self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS))
            });

        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: UserIdentity {
                id: self.user.id,
                email: self.user.email.unwrap_or_default(),
            },
        }
    }
}

/// Error body; GoTrue and PostgREST use different field names.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

/// Pick the human-readable message out of an error body.
fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    parsed
        .error_description
        .or(parsed.msg)
        .or(parsed.message)
        .or(parsed.error)
}

fn transport(err: reqwest::Error) -> AuthError {
    AuthError::Transport(err.to_string())
}

async fn error_from_response(response: reqwest::Response, class: ErrorClass) -> AuthError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));

    if status.as_u16() == 429 {
        tracing::warn!("Identity service rate limit hit (429)");
    }

    match (class, status.as_u16()) {
        (ErrorClass::Credential, 400 | 401 | 403 | 422) => AuthError::Credential(message),
        _ => AuthError::Backend(message),
    }
}

/// Check response status and return error if not successful.
async fn check_response(response: reqwest::Response, class: ErrorClass) -> Result<(), AuthError> {
    if response.status().is_success() {
        return Ok(());
    }
    Err(error_from_response(response, class).await)
}

/// Check response and parse JSON body.
async fn check_response_json<T: DeserializeOwned>(
    response: reqwest::Response,
    class: ErrorClass,
) -> Result<T, AuthError> {
    if !response.status().is_success() {
        return Err(error_from_response(response, class).await);
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::Transport(format!("Unreadable identity response: {e}")))
}

// ─── PKCE ────────────────────────────────────────────────────

fn pkce_pair() -> Result<(String, String), AuthError> {
    let mut bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::Backend("Random source unavailable".to_string()))?;
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let challenge = pkce_challenge(&verifier);
    Ok((verifier, challenge))
}

/// S256 code challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
