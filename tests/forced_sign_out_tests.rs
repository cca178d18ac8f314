// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Forced sign-out racing a newer session.
//!
//! The HTTP identity client drops its local session and publishes
//! `SignedOut` before the logout request completes. A session that arrives
//! in that window must survive the teardown.

use async_trait::async_trait;
use quillmate_auth::backend::{IdentityBackend, MemoryIdentity, OAuthProvider};
use quillmate_auth::error::AuthError;
use quillmate_auth::models::{AuthEvent, AuthEventKind, Profile, ProfileUpdate, Session};
use quillmate_auth::services::{ProfileSlot, ReconcileOutcome, SessionStore};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};

mod common;
use common::{test_server, ALICE_EMAIL, ALICE_PASSWORD};

const BOB_EMAIL: &str = "b@x.com";
const BOB_PASSWORD: &str = "battery-staple";

/// Memory client whose logout request hangs until released.
struct SlowLogout {
    inner: Arc<MemoryIdentity>,
    started: Notify,
    release: Notify,
}

#[async_trait]
impl IdentityBackend for SlowLogout {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        self.inner.current_session().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.subscribe()
    }

    async fn sign_up(&self, email: &str, password: &str, full_name: &str) -> Result<(), AuthError> {
        self.inner.sign_up(email, password, full_name).await
    }

    async fn verify_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        self.inner.verify_otp(email, code).await
    }

    async fn resend_otp(&self, email: &str) -> Result<(), AuthError> {
        self.inner.resend_otp(email).await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.inner.sign_in_with_password(email, password).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.inner.sign_out().await;
        self.started.notify_one();
        self.release.notified().await;
        result
    }

    async fn send_password_reset(&self, email: &str, redirect_to: &str) -> Result<(), AuthError> {
        self.inner.send_password_reset(email, redirect_to).await
    }

    async fn verify_recovery(&self, token_hash: &str) -> Result<(), AuthError> {
        self.inner.verify_recovery(token_hash).await
    }

    async fn update_password(&self, new_password: &str) -> Result<(), AuthError> {
        self.inner.update_password(new_password).await
    }

    async fn oauth_authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
    ) -> Result<String, AuthError> {
        self.inner.oauth_authorize_url(provider, redirect_to).await
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<(), AuthError> {
        self.inner.exchange_oauth_code(code).await
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<Profile>, AuthError> {
        self.inner.fetch_profile(user_id).await
    }

    async fn update_profile(&self, user_id: &str, update: &ProfileUpdate) -> Result<(), AuthError> {
        self.inner.update_profile(user_id, update).await
    }

    async fn recover_account(&self) -> Result<(), AuthError> {
        self.inner.recover_account().await
    }
}

/// Store over a slow-logout client with a soft-deleted Alice and an active Bob.
async fn setup() -> (SessionStore, Arc<SlowLogout>) {
    let server = test_server();
    let alice = server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    server.soft_delete(&alice);
    server.create_user(BOB_EMAIL, BOB_PASSWORD, "Bob");

    let backend = Arc::new(SlowLogout {
        inner: server.client(),
        started: Notify::new(),
        release: Notify::new(),
    });
    let store = SessionStore::new(backend.clone() as Arc<dyn IdentityBackend>);
    store.initialize().await;
    (store, backend)
}

/// Sign Alice in and let her reconcile run until it is stuck in logout.
async fn alice_forced_out(
    store: &SessionStore,
    backend: &SlowLogout,
) -> tokio::task::JoinHandle<ReconcileOutcome> {
    backend
        .sign_in_with_password(ALICE_EMAIL, ALICE_PASSWORD)
        .await
        .unwrap();
    let session = backend.current_session().await.unwrap();
    let run = store
        .handle_event(AuthEvent::new(AuthEventKind::SignedIn, session))
        .expect("sign-in starts a reconcile");

    backend.started.notified().await;
    // Withheld while the logout is in flight.
    assert_eq!(store.snapshot().profile, ProfileSlot::Absent);
    run
}

#[tokio::test]
async fn test_newer_session_survives_forced_sign_out() {
    let (store, backend) = setup().await;
    let alice_run = alice_forced_out(&store, &backend).await;

    // The logout's own event lands, then Bob signs in on the same browser.
    assert!(store.handle_event(AuthEvent::signed_out()).is_none());
    let snapshot = store.sign_in(BOB_EMAIL, BOB_PASSWORD).await.unwrap();
    assert_eq!(snapshot.user.as_ref().unwrap().email, BOB_EMAIL);

    backend.release.notify_one();
    assert_eq!(alice_run.await.unwrap(), ReconcileOutcome::StaleReadIgnored);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.user.unwrap().email, BOB_EMAIL);
    assert!(matches!(snapshot.profile, ProfileSlot::Active(_)));
    assert!(!snapshot.account_pending_deletion);
    assert!(backend.current_session().await.unwrap().is_some());
}

#[tokio::test]
async fn test_own_sign_out_event_still_flags_pending_deletion() {
    let (store, backend) = setup().await;
    let alice_run = alice_forced_out(&store, &backend).await;

    assert!(store.handle_event(AuthEvent::signed_out()).is_none());
    assert!(store.snapshot().user.is_none());

    backend.release.notify_one();
    assert_eq!(alice_run.await.unwrap(), ReconcileOutcome::ForcedSignOut);

    let snapshot = store.snapshot();
    assert!(snapshot.user.is_none());
    assert!(snapshot.account_pending_deletion);
}

#[tokio::test]
async fn test_forced_sign_out_without_interleaving() {
    let (store, backend) = setup().await;
    let alice_run = alice_forced_out(&store, &backend).await;

    backend.release.notify_one();
    assert_eq!(alice_run.await.unwrap(), ReconcileOutcome::ForcedSignOut);

    let snapshot = store.snapshot();
    assert!(snapshot.session.is_none());
    assert_eq!(snapshot.profile, ProfileSlot::Absent);
    assert!(snapshot.account_pending_deletion);
}
