// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process identity service.
//!
//! `MemoryIdentityServer` plays the remote service (accounts, profile rows,
//! codes, issued tokens); each browser context talks to it through its own
//! `MemoryIdentity` client. Used for local development without an identity
//! service and by the test suite, which also uses the fault-injection and
//! fetch-gating hooks.
//!
//! There is no row-level security: profile reads are not checked against the
//! caller's token. Writes and account recovery are.

use super::{AuthEventBus, IdentityBackend, OAuthProvider};
use crate::error::AuthError;
use crate::models::{
    AuthEvent, AuthEventKind, Profile, ProfileStatus, ProfileUpdate, Session, UserIdentity,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};

const SESSION_TTL_SECS: i64 = 3600;
const INVALID_LOGIN: &str = "Invalid login credentials";
const INVALID_CODE: &str = "Token has expired or is invalid";

#[derive(Debug, Clone)]
struct Account {
    id: String,
    password: String,
    confirmed: bool,
}

/// Shared in-memory identity service state.
#[derive(Default)]
pub struct MemoryIdentityServer {
    /// Accounts keyed by lowercase email
    accounts: DashMap<String, Account>,
    /// Profile rows keyed by user ID
    profiles: DashMap<String, Profile>,
    /// Pending sign-up codes keyed by email
    signup_codes: DashMap<String, String>,
    /// Recovery link tokens -> email
    recovery_tokens: DashMap<String, String>,
    /// OAuth authorization codes -> email
    oauth_codes: DashMap<String, String>,
    /// Live access tokens -> user ID
    access_tokens: DashMap<String, String>,
    /// Held profile fetches, released by flipping the gate to open
    fetch_gates: DashMap<String, watch::Sender<bool>>,
    fixed_code: Option<String>,
    next_user: AtomicU64,
    fail_profile_fetch: AtomicBool,
    fail_sign_out: AtomicBool,
    fail_recover: AtomicBool,
    ignore_recover: AtomicBool,
    sign_out_calls: AtomicUsize,
    profile_fetches: AtomicUsize,
}

impl MemoryIdentityServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every issued sign-up code will be `code` (deterministic tests).
    pub fn with_fixed_code(code: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            fixed_code: Some(code.into()),
            ..Self::default()
        })
    }

    /// Create a new client bound to this server.
    pub fn client(self: &Arc<Self>) -> Arc<MemoryIdentity> {
        Arc::new(MemoryIdentity::new(self.clone()))
    }

    // ─── Admin operations ────────────────────────────────────────

    /// Create a confirmed account with an active profile; returns the user ID.
    pub fn create_user(&self, email: &str, password: &str, full_name: &str) -> String {
        let id = self.insert_account(email, password, true);
        let mut profile = Profile::new(id.clone());
        profile.full_name = Some(full_name.to_string());
        self.profiles.insert(id.clone(), profile);
        id
    }

    /// Mark a profile for deletion, as the account-deletion job does.
    pub fn soft_delete(&self, user_id: &str) {
        if let Some(mut profile) = self.profiles.get_mut(user_id) {
            profile.deleted_at = Some(Utc::now());
            profile.status = ProfileStatus::Deleted;
        }
    }

    pub fn profile(&self, user_id: &str) -> Option<Profile> {
        self.profiles.get(user_id).map(|p| p.clone())
    }

    pub fn put_profile(&self, profile: Profile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn remove_profile(&self, user_id: &str) {
        self.profiles.remove(user_id);
    }

    pub fn user_id(&self, email: &str) -> Option<String> {
        self.accounts.get(&normalize(email)).map(|a| a.id.clone())
    }

    /// The sign-up code most recently mailed to `email`.
    pub fn pending_code(&self, email: &str) -> Option<String> {
        self.signup_codes.get(&normalize(email)).map(|c| c.clone())
    }

    /// Token hash for a password-recovery link, if the account exists.
    pub fn recovery_token(&self, email: &str) -> Option<String> {
        self.recovery_tokens
            .iter()
            .find(|entry| entry.value() == &normalize(email))
            .map(|entry| entry.key().clone())
    }

    /// Simulate the provider approving an OAuth login for `email`.
    ///
    /// Accounts that do not exist yet are created confirmed, like a first
    /// social login.
    pub fn approve_oauth(&self, email: &str) -> String {
        let email = normalize(email);
        if !self.accounts.contains_key(&email) {
            let id = self.insert_account(&email, "", true);
            self.profiles.insert(id.clone(), Profile::new(id));
        }
        let code = random_token();
        self.oauth_codes.insert(code.clone(), email);
        code
    }

    /// Block profile fetches for `user_id` until released.
    pub fn hold_profile_fetches(&self, user_id: &str) {
        let (tx, _) = watch::channel(false);
        self.fetch_gates.insert(user_id.to_string(), tx);
    }

    pub fn release_profile_fetches(&self, user_id: &str) {
        if let Some((_, tx)) = self.fetch_gates.remove(user_id) {
            let _ = tx.send(true);
        }
    }

    pub fn fail_profile_fetches(&self, fail: bool) {
        self.fail_profile_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_outs(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Make `recover_account` fail outright.
    pub fn fail_account_recoveries(&self, fail: bool) {
        self.fail_recover.store(fail, Ordering::SeqCst);
    }

    /// Make `recover_account` report success without clearing the markers.
    pub fn ignore_account_recoveries(&self, ignore: bool) {
        self.ignore_recover.store(ignore, Ordering::SeqCst);
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }

    pub fn profile_fetches(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }

    // ─── Internals ───────────────────────────────────────────────

    fn insert_account(&self, email: &str, password: &str, confirmed: bool) -> String {
        let id = format!("user-{}", self.next_user.fetch_add(1, Ordering::SeqCst) + 1);
        self.accounts.insert(
            normalize(email),
            Account {
                id: id.clone(),
                password: password.to_string(),
                confirmed,
            },
        );
        id
    }

    fn issue_code(&self, email: &str) -> String {
        let code = self.fixed_code.clone().unwrap_or_else(random_code);
        self.signup_codes.insert(normalize(email), code.clone());
        // Stand-in for the confirmation email.
        tracing::info!(email = %email, code = %code, "Sign-up code issued (memory identity)");
        code
    }

    fn issue_session(&self, email: &str, account: &Account) -> Session {
        let access_token = random_token();
        self.access_tokens
            .insert(access_token.clone(), account.id.clone());
        Session {
            access_token,
            refresh_token: random_token(),
            expires_at: Utc::now() + Duration::seconds(SESSION_TTL_SECS),
            user: UserIdentity {
                id: account.id.clone(),
                email: normalize(email),
            },
        }
    }

    fn account(&self, email: &str) -> Option<Account> {
        self.accounts.get(&normalize(email)).map(|a| a.clone())
    }

    fn email_for(&self, user_id: &str) -> Option<String> {
        self.accounts
            .iter()
            .find(|entry| entry.value().id == user_id)
            .map(|entry| entry.key().clone())
    }

    async fn wait_for_gate(&self, user_id: &str) {
        let gate = self.fetch_gates.get(user_id).map(|tx| tx.subscribe());
        if let Some(mut rx) = gate {
            let _ = rx.wait_for(|open| *open).await;
        }
    }
}

/// Client for one browser context.
pub struct MemoryIdentity {
    server: Arc<MemoryIdentityServer>,
    session: Mutex<Option<Session>>,
    oauth_started: AtomicBool,
    events: AuthEventBus,
}

impl MemoryIdentity {
    pub fn new(server: Arc<MemoryIdentityServer>) -> Self {
        Self {
            server,
            session: Mutex::new(None),
            oauth_started: AtomicBool::new(false),
            events: AuthEventBus::new(),
        }
    }

    pub fn server(&self) -> &Arc<MemoryIdentityServer> {
        &self.server
    }

    fn held_session(&self) -> Option<Session> {
        self.session.lock().map(|s| s.clone()).unwrap_or(None)
    }

    fn set_session(&self, session: Option<Session>, kind: AuthEventKind) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = session.clone();
        }
        self.events.publish(AuthEvent::new(kind, session));
    }

    /// User ID behind the held session, if its token is still live.
    fn authenticated_user(&self) -> Result<String, AuthError> {
        let session = self.held_session().ok_or(AuthError::NotAuthenticated)?;
        self.server
            .access_tokens
            .get(&session.access_token)
            .map(|id| id.clone())
            .ok_or_else(|| AuthError::Credential("JWT expired".to_string()))
    }
}

#[async_trait]
impl IdentityBackend for MemoryIdentity {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.held_session() else {
            return Ok(None);
        };
        if self.server.access_tokens.contains_key(&session.access_token) {
            return Ok(Some(session));
        }
        // Revoked elsewhere.
        self.set_session(None, AuthEventKind::SignedOut);
        Ok(None)
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
        match self.server.account(email) {
            Some(account) if account.confirmed => {
                return Err(AuthError::Credential("User already registered".to_string()));
            }
            Some(_) => {}
            None => {
                let id = self.server.insert_account(email, password, false);
                // Rows are created by a trigger on the real service.
                let mut profile = Profile::new(id.clone());
                profile.full_name = Some(full_name.to_string());
                self.server.profiles.insert(id, profile);
            }
        }
        self.server.issue_code(email);
        Ok(())
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let key = normalize(email);
        let matches = self
            .server
            .signup_codes
            .get(&key)
            .map(|expected| expected.as_str() == code.trim())
            .unwrap_or(false);
        if !matches {
            return Err(AuthError::Credential(INVALID_CODE.to_string()));
        }
        self.server.signup_codes.remove(&key);

        let account = {
            let mut entry = self
                .server
                .accounts
                .get_mut(&key)
                .ok_or_else(|| AuthError::Credential(INVALID_CODE.to_string()))?;
            entry.confirmed = true;
            entry.clone()
        };

        let session = self.server.issue_session(email, &account);
        self.set_session(Some(session), AuthEventKind::SignedIn);
        Ok(())
    }

    async fn resend_otp(&self, email: &str) -> Result<(), AuthError> {
        // Unknown or confirmed addresses succeed silently, like the real service.
        if let Some(account) = self.server.account(email) {
            if !account.confirmed {
                self.server.issue_code(email);
            }
        }
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let account = self
            .server
            .account(email)
            .filter(|a| !a.password.is_empty() && a.password == password)
            .ok_or_else(|| AuthError::Credential(INVALID_LOGIN.to_string()))?;

        if !account.confirmed {
            return Err(AuthError::Credential("Email not confirmed".to_string()));
        }

        let session = self.server.issue_session(email, &account);
        self.set_session(Some(session), AuthEventKind::SignedIn);
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.server.sign_out_calls.fetch_add(1, Ordering::SeqCst);

        let previous = self.session.lock().map(|mut s| s.take()).unwrap_or(None);
        self.events.publish(AuthEvent::signed_out());

        if self.server.fail_sign_out.load(Ordering::SeqCst) {
            // Local session is gone; the token stays live server-side.
            return Err(AuthError::Transport("Failed to fetch".to_string()));
        }

        if let Some(session) = previous {
            self.server.access_tokens.remove(&session.access_token);
        }
        Ok(())
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        if self.server.account(email).is_some() {
            let token = random_token();
            self.server
                .recovery_tokens
                .insert(token.clone(), normalize(email));
            tracing::info!(
                email = %email,
                link = %format!("{redirect_to}?token_hash={token}"),
                "Recovery link issued (memory identity)"
            );
        }
        Ok(())
    }

    async fn verify_recovery(&self, token_hash: &str) -> Result<(), AuthError> {
        let (_, email) = self
            .server
            .recovery_tokens
            .remove(token_hash)
            .ok_or_else(|| AuthError::Credential(INVALID_CODE.to_string()))?;
        let account = self
            .server
            .account(&email)
            .ok_or_else(|| AuthError::Credential(INVALID_CODE.to_string()))?;

        let session = self.server.issue_session(&email, &account);
        self.set_session(Some(session), AuthEventKind::PasswordRecovery);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        let user_id = self.authenticated_user()?;
        let email = self
            .server
            .email_for(&user_id)
            .ok_or(AuthError::NotAuthenticated)?;
        if let Some(mut account) = self.server.accounts.get_mut(&email) {
            account.password = new_password.to_string();
        }
        self.events
            .publish(AuthEvent::new(AuthEventKind::UserUpdated, self.held_session()));
        Ok(())
    }

    async fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError> {
        self.oauth_started.store(true, Ordering::SeqCst);
        // The provider approves immediately and bounces straight back.
        let code = self
            .server
            .approve_oauth(&format!("{}.user@example.test", provider.as_str()));
        let sep = if redirect_to.contains('?') { '&' } else { '?' };
        Ok(format!("{redirect_to}{sep}code={code}"))
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<(), AuthError> {
        if !self.oauth_started.swap(false, Ordering::SeqCst) {
            return Err(AuthError::validation(
                "Sign-in was not started from this browser",
            ));
        }
        let (_, email) = self
            .server
            .oauth_codes
            .remove(code)
            .ok_or_else(|| AuthError::Credential("Invalid authorization code".to_string()))?;
        let account = self
            .server
            .account(&email)
            .ok_or_else(|| AuthError::Credential("Invalid authorization code".to_string()))?;

        let session = self.server.issue_session(&email, &account);
        self.set_session(Some(session), AuthEventKind::SignedIn);
        Ok(())
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        self.server.profile_fetches.fetch_add(1, Ordering::SeqCst);
        self.server.wait_for_gate(user_id).await;

        if self.server.fail_profile_fetch.load(Ordering::SeqCst) {
            return Err(AuthError::Transport("Failed to fetch".to_string()));
        }
        Ok(self.server.profile(user_id))
    }

    async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<(), AuthError> {
        let caller = self.authenticated_user()?;
        if caller != user_id {
            return Err(AuthError::Backend(
                "permission denied for table profiles".to_string(),
            ));
        }
        let mut profile = self
            .server
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| AuthError::Backend("Profile not found".to_string()))?;
        profile.apply(update);
        Ok(())
    }

    async fn recover_account(&self) -> Result<(), AuthError> {
        let caller = self.authenticated_user()?;
        if self.server.fail_recover.load(Ordering::SeqCst) {
            return Err(AuthError::Backend(
                "Account recovery is temporarily unavailable".to_string(),
            ));
        }
        if self.server.ignore_recover.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut profile = self
            .server
            .profiles
            .get_mut(&caller)
            .ok_or_else(|| AuthError::Backend("Profile not found".to_string()))?;
        profile.deleted_at = None;
        profile.status = ProfileStatus::Active;
        Ok(())
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn random_bytes() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    // Only fails without an OS entropy source; dev tokens just need to be unique.
    if SystemRandom::new().fill(&mut bytes).is_err() {
        bytes = (Utc::now().timestamp_nanos_opt().unwrap_or_default() as u128).to_le_bytes();
    }
    bytes
}

fn random_token() -> String {
    hex::encode(random_bytes())
}

/// Eight-digit numeric code.
fn random_code() -> String {
    let bytes = random_bytes();
    let n = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) % 100_000_000;
    format!("{n:08}")
}
