// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity service boundary.
//!
//! The identity service owns sessions, credentials and profile rows. Each
//! browser context gets its own client instance, which holds that context's
//! session and publishes its auth events.

pub mod events;
pub mod gotrue;
pub mod memory;

pub use events::AuthEventBus;
pub use gotrue::GoTrueBackend;
pub use memory::{MemoryIdentity, MemoryIdentityServer};

use crate::error::AuthError;
use crate::models::{AuthEvent, Profile, ProfileUpdate, Session};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// OAuth providers offered on the sign-in page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
    GitHub,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::GitHub => "github",
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Self::Google),
            "github" => Ok(Self::GitHub),
            other => Err(AuthError::validation(format!(
                "Unsupported login provider: {other}"
            ))),
        }
    }
}

/// Operations the auth core needs from the identity service.
///
/// Every method surfaces the service's error verbatim; none retry.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Current session, refreshed first if it is about to expire.
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Subscribe to session changes made through this client.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    /// Create an unconfirmed account; a verification code is emailed.
    async fn sign_up(&self, email: &str, password: &str, full_name: &str)
        -> Result<(), AuthError>;

    /// Confirm the sign-up code. Establishes a session on success.
    async fn verify_otp(&self, email: &str, code: &str) -> Result<(), AuthError>;

    async fn resend_otp(&self, email: &str) -> Result<(), AuthError>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), AuthError>;

    /// Invalidate the session. The local session is dropped even on error.
    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError>;

    /// Exchange a password-recovery link token for a session.
    async fn verify_recovery(&self, token_hash: &str) -> Result<(), AuthError>;

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError>;

    /// Start an OAuth sign-in; returns the provider URL to redirect to.
    async fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError>;

    /// Finish an OAuth sign-in with the callback's authorization code.
    async fn exchange_oauth_code(&self, code: &str) -> Result<(), AuthError>;

    /// Fetch the profile row for `user_id`; `None` when no row exists.
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError>;

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate)
        -> Result<(), AuthError>;

    /// Clear the soft-delete markers on the caller's own profile.
    async fn recover_account(&self) -> Result<(), AuthError>;
}

/// Creates one backend client per browser context.
pub type BackendFactory = Arc<dyn Fn() -> Arc<dyn IdentityBackend> + Send + Sync>;
