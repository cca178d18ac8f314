// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session state store for one browser context.
//!
//! Holds `{session, user, profile, loading}` and keeps it in step with the
//! identity backend:
//! - Auth events replace session/user immediately, then trigger a profile
//!   reconcile in the background
//! - Every session change bumps a generation counter; reconcile results are
//!   only written if their generation is still current
//! - The profile slot is written only by the reconciler
//!
//! State is published through a `watch` channel so views can subscribe.

use super::reconciler::{self, ProfileSlot, ReconcileOutcome, ReconcilePolicy};
use super::view_state::AuthViewState;
use crate::backend::{IdentityBackend, OAuthProvider};
use crate::error::AuthError;
use crate::models::{AuthEvent, AuthEventKind, Profile, ProfileUpdate, Session, UserIdentity};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use validator::{Validate, ValidateEmail};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_NAME_LEN: usize = 100;

/// Externally visible store state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub session: Option<Session>,
    pub user: Option<UserIdentity>,
    pub profile: ProfileSlot,
    pub loading: bool,
    /// Last sign-out was forced because the account is scheduled for deletion.
    pub account_pending_deletion: bool,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            user: None,
            profile: ProfileSlot::Absent,
            loading: true,
            account_pending_deletion: false,
        }
    }
}

impl AuthSnapshot {
    /// The active profile; soft-deleted rows are never returned.
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.active()
    }

    pub fn view_state(&self) -> AuthViewState {
        AuthViewState::derive(self.loading, self.user.as_ref(), &self.profile)
    }

    /// No reconcile is pending for the current user.
    pub fn is_settled(&self) -> bool {
        self.user.is_none() || self.profile.is_resolved()
    }
}

struct StoreInner {
    backend: Arc<dyn IdentityBackend>,
    state: watch::Sender<AuthSnapshot>,
    generation: AtomicU64,
    recovery_policy: AtomicBool,
}

/// Handle to one browser context's auth state. Clones share state.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

/// Live event subscription; dropping it stops the event pump.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl SessionStore {
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Self {
            inner: Arc::new(StoreInner {
                backend,
                state,
                generation: AtomicU64::new(0),
                recovery_policy: AtomicBool::new(false),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn IdentityBackend> {
        &self.inner.backend
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn policy(&self) -> ReconcilePolicy {
        if self.inner.recovery_policy.load(Ordering::SeqCst) {
            ReconcilePolicy::Recovery
        } else {
            ReconcilePolicy::Enforce
        }
    }

    pub fn set_policy(&self, policy: ReconcilePolicy) {
        self.inner
            .recovery_policy
            .store(policy == ReconcilePolicy::Recovery, Ordering::SeqCst);
    }

    // ─── Lifecycle ───────────────────────────────────────────────

    /// Restore the backend's current session and resolve its profile.
    ///
    /// `loading` stays true until this returns.
    pub async fn initialize(&self) -> AuthSnapshot {
        let started_at = self.inner.generation.load(Ordering::SeqCst);

        let session = match self.inner.backend.current_session().await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "Could not restore session, starting signed out");
                None
            }
        };

        // An event that arrived meanwhile is newer than what we fetched.
        if self.inner.generation.load(Ordering::SeqCst) == started_at {
            let handle = self.handle_event(AuthEvent::new(AuthEventKind::InitialSession, session));
            join_reconcile(handle).await;
        }

        self.inner.state.send_modify(|snap| snap.loading = false);
        self.snapshot()
    }

    /// Start applying the backend's auth events, in delivery order.
    pub fn attach(&self) -> Subscription {
        let mut events = self.inner.backend.subscribe();
        let store = self.clone();

        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        store.handle_event(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auth events dropped, resyncing session");
                        store.sync_session(AuthEventKind::InitialSession).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { task }
    }

    /// Apply a session change.
    ///
    /// Session and user are replaced before this returns; the profile is
    /// reconciled on a spawned task whose handle is returned. Replaying a
    /// session equal to the current one is a no-op.
    pub fn handle_event(&self, event: AuthEvent) -> Option<JoinHandle<ReconcileOutcome>> {
        let mut reconcile_for = None;

        self.inner.state.send_if_modified(|snap| {
            if snap.session == event.session && event.kind != AuthEventKind::UserUpdated {
                return false;
            }

            let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let next_user = event.session.as_ref().map(|s| s.user.clone());
            let same_user = next_user.is_some() && next_user == snap.user;

            tracing::debug!(
                event = event.kind.as_str(),
                user_id = next_user.as_ref().map(|u| u.id.as_str()),
                generation,
                "Session changed"
            );

            match &next_user {
                Some(user) => {
                    // Token refreshes keep showing the profile while it is re-checked.
                    if !same_user {
                        snap.profile = ProfileSlot::Unresolved;
                    }
                    snap.account_pending_deletion = false;
                    reconcile_for = Some((user.id.clone(), generation));
                }
                None => snap.profile = ProfileSlot::Absent,
            }
            snap.user = next_user;
            snap.session = event.session.clone();
            true
        });

        reconcile_for.map(|(user_id, generation)| {
            let store = self.clone();
            tokio::spawn(reconciler::reconcile(store, user_id, generation))
        })
    }

    /// Wait until no reconcile is pending for the current user.
    pub async fn settled(&self) -> AuthSnapshot {
        let mut rx = self.inner.state.subscribe();
        let settled = rx.wait_for(AuthSnapshot::is_settled).await.map(|s| s.clone());
        settled.unwrap_or_else(|_| self.snapshot())
    }

    /// Re-read the backend's session and apply it.
    async fn sync_session(&self, kind: AuthEventKind) -> AuthSnapshot {
        match self.inner.backend.current_session().await {
            Ok(session) => {
                let handle = self.handle_event(AuthEvent::new(kind, session));
                join_reconcile(handle).await;
            }
            Err(err) => tracing::warn!(error = %err, "Could not read session after sign-in"),
        }
        self.settled().await
    }

    // ─── Reconciler hooks ────────────────────────────────────────

    /// Write a reconcile result if `generation` is still current.
    pub(crate) fn apply_profile(&self, generation: u64, user_id: &str, slot: ProfileSlot) -> bool {
        let mut applied = false;
        self.inner.state.send_if_modified(|snap| {
            if self.inner.generation.load(Ordering::SeqCst) != generation
                || snap.user.as_ref().map(|u| u.id.as_str()) != Some(user_id)
            {
                return false;
            }
            snap.profile = slot;
            applied = true;
            true
        });
        applied
    }

    /// Sign-out after detecting a soft-deleted profile at `generation`.
    ///
    /// The local teardown only happens if nothing but this logout's own
    /// `SignedOut` event has been applied since; a session that arrived while
    /// the logout was in flight is left alone. Returns whether it tore down.
    pub(crate) async fn force_sign_out(&self, generation: u64) -> bool {
        if let Err(err) = self.inner.backend.sign_out().await {
            tracing::warn!(error = %err, "Forced sign-out failed upstream, clearing local session anyway");
        }

        let mut cleared = false;
        self.inner.state.send_if_modified(|snap| {
            let current = self.inner.generation.load(Ordering::SeqCst);
            let own_sign_out = snap.user.is_none() && current == generation + 1;
            if current != generation && !own_sign_out {
                return false;
            }
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            Self::clear_snapshot(snap, true);
            cleared = true;
            true
        });
        cleared
    }

    fn clear(&self) {
        self.inner.state.send_modify(|snap| {
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            Self::clear_snapshot(snap, false);
        });
    }

    fn clear_snapshot(snap: &mut AuthSnapshot, pending_deletion: bool) {
        snap.session = None;
        snap.user = None;
        snap.profile = ProfileSlot::Absent;
        snap.account_pending_deletion = pending_deletion;
    }

    /// Re-run the reconciler for the current user and wait for it.
    pub async fn refresh_profile(&self) -> ReconcileOutcome {
        let mut target = None;
        self.inner.state.send_if_modified(|snap| {
            if let Some(user) = &snap.user {
                let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                target = Some((user.id.clone(), generation));
            }
            false
        });

        match target {
            Some((user_id, generation)) => {
                reconciler::reconcile(self.clone(), user_id, generation).await
            }
            None => ReconcileOutcome::NoUser,
        }
    }

    /// The signed-in user, unless their profile is only held for the
    /// recovery view.
    fn active_user(&self) -> Result<UserIdentity, AuthError> {
        let snap = self.inner.state.borrow();
        let user = snap.user.clone().ok_or(AuthError::NotAuthenticated)?;
        if matches!(snap.profile, ProfileSlot::PendingRecovery(_)) {
            return Err(AuthError::validation(
                "Restore your account before making changes",
            ));
        }
        Ok(user)
    }

    // ─── Operations ──────────────────────────────────────────────

    /// Request an account. No session exists until the emailed code is verified.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<(), AuthError> {
        let email = check_email(email)?;
        check_password(password)?;
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(AuthError::validation("Please enter your name"));
        }
        if full_name.chars().count() > MAX_NAME_LEN {
            return Err(AuthError::validation("Name must be 1-100 characters"));
        }

        self.inner.backend.sign_up(&email, password, full_name).await?;
        tracing::info!(email = %email, "Sign-up requested, awaiting code");
        Ok(())
    }

    /// Confirm a sign-up code; establishes the session.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<AuthSnapshot, AuthError> {
        let email = check_email(email)?;
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::validation("Please enter the code from your email"));
        }

        self.inner.backend.verify_otp(&email, code).await?;
        Ok(self.sync_session(AuthEventKind::SignedIn).await)
    }

    pub async fn resend_otp(&self, email: &str) -> Result<(), AuthError> {
        let email = check_email(email)?;
        self.inner.backend.resend_otp(&email).await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSnapshot, AuthError> {
        let email = check_email(email)?;
        if password.is_empty() {
            return Err(AuthError::validation("Please enter your password"));
        }

        self.inner
            .backend
            .sign_in_with_password(&email, password)
            .await?;
        Ok(self.sync_session(AuthEventKind::SignedIn).await)
    }

    /// Sign out. Local state is cleared even if the backend call fails.
    pub async fn sign_out(&self) {
        if let Err(err) = self.inner.backend.sign_out().await {
            tracing::warn!(error = %err, "Sign-out failed upstream, clearing local session anyway");
        }
        self.clear();
    }

    pub async fn reset_password(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        let email = check_email(email)?;
        self.inner
            .backend
            .send_password_reset(&email, redirect_to)
            .await
    }

    /// Handle the arrival of a password-recovery link.
    pub async fn complete_password_recovery(
        &self,
        token_hash: &str,
    ) -> Result<AuthSnapshot, AuthError> {
        if token_hash.trim().is_empty() {
            return Err(AuthError::validation("Recovery link is incomplete"));
        }
        self.inner.backend.verify_recovery(token_hash.trim()).await?;
        Ok(self.sync_session(AuthEventKind::PasswordRecovery).await)
    }

    pub async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        self.active_user()?;
        check_password(new_password)?;
        self.inner.backend.update_password(new_password).await
    }

    /// Write a self-service profile edit and re-read it.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<AuthSnapshot, AuthError> {
        let user = self.active_user()?;
        update.validate()?;
        if update.is_empty() {
            return Err(AuthError::validation("Nothing to update"));
        }

        self.inner.backend.update_profile(&user.id, update).await?;
        self.refresh_profile().await;
        Ok(self.snapshot())
    }

    /// Begin an OAuth sign-in; returns the provider URL to send the browser to.
    pub async fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError> {
        self.inner
            .backend
            .oauth_authorize_url(provider, redirect_to)
            .await
    }

    /// OAuth callback: exchange the code, then follow the normal session path.
    pub async fn complete_oauth(&self, code: &str) -> Result<AuthSnapshot, AuthError> {
        if code.trim().is_empty() {
            return Err(AuthError::validation("Missing authorization code"));
        }
        self.inner.backend.exchange_oauth_code(code.trim()).await?;
        Ok(self.sync_session(AuthEventKind::SignedIn).await)
    }
}

async fn join_reconcile(handle: Option<JoinHandle<ReconcileOutcome>>) {
    if let Some(handle) = handle {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Profile reconcile task failed");
        }
    }
}

fn check_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_ascii_lowercase();
    if !email.validate_email() {
        return Err(AuthError::validation("Please enter a valid email address"));
    }
    Ok(email)
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
