// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Account recovery flow over HTTP.
//!
//! A soft-deleted account is signed out on a normal sign-in, can sign in
//! again through the recovery view, restore itself and land on the dashboard
//! after a full reload.

use axum::http::StatusCode;
use chrono::{TimeZone, Utc};
use quillmate_auth::models::ProfileStatus;
use serde_json::json;

mod common;
use common::{create_test_app, json_body, location, Browser, ALICE_EMAIL, ALICE_PASSWORD};

fn soft_delete(server: &quillmate_auth::backend::MemoryIdentityServer, user_id: &str) {
    let mut profile = server.profile(user_id).unwrap();
    profile.deleted_at = Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    profile.status = ProfileStatus::Deleted;
    server.put_profile(profile);
}

#[tokio::test]
async fn test_deleted_account_restore_flow() {
    let (app, _, server) = create_test_app();
    let user_id = server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    soft_delete(&server, &user_id);
    let mut browser = Browser::new(&app);

    // Normal sign-in is refused and the session torn down.
    let response = browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "account_pending_deletion");
    assert_eq!(server.sign_out_calls(), 1);

    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["state"], "unauthenticated");
    assert_eq!(session["account_pending_deletion"], true);

    // Signing in for the recovery view keeps the session.
    let response = browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD, "next": "/recover" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["redirect_to"], "/recover");
    assert_eq!(body["session"]["state"], "authenticated_pending_recovery");
    assert!(body["session"]["profile"].is_null());

    let response = browser.get("/recover").await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["full_name"], "Alice");
    assert_eq!(view["deleted_at"], "2026-01-01T00:00:00Z");

    // Restore, then the browser reloads into a fresh store.
    let response = browser.post("/recover/restore", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let navigation = json_body(response).await;
    assert_eq!(navigation["location"], "/dashboard");
    assert_eq!(navigation["full_reload"], true);

    let restored = server.profile(&user_id).unwrap();
    assert!(!restored.is_soft_deleted());

    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["state"], "authenticated_active");
    assert_eq!(session["policy"], "enforce");
    assert!(session["profile"]["deleted_at"].is_null());

    let response = browser.get("/dashboard").await;
    assert_eq!(response.status(), StatusCode::OK);
    let dashboard = json_body(response).await;
    assert_eq!(dashboard["user"]["email"], ALICE_EMAIL);
    assert_eq!(dashboard["profile"]["full_name"], "Alice");
}

#[tokio::test]
async fn test_recovery_view_requires_sign_in() {
    let (app, _, _) = create_test_app();
    let mut browser = Browser::new(&app);

    let response = browser.get("/recover").await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/sign-in?next=%2Frecover");
}

#[tokio::test]
async fn test_healthy_account_skips_recovery_view() {
    let (app, _, server) = create_test_app();
    server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    let mut browser = Browser::new(&app);
    browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD, "next": "/recover" }),
        )
        .await;

    let response = browser.get("/recover").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/dashboard");

    // Leaving the recovery view restores normal enforcement.
    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["policy"], "enforce");

    let response = browser.post("/recover/restore", json!({})).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/dashboard");
}

#[tokio::test]
async fn test_account_without_profile_row_skips_recovery_view() {
    let (app, _, server) = create_test_app();
    let user_id = server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    server.remove_profile(&user_id);
    let mut browser = Browser::new(&app);
    browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD, "next": "/recover" }),
        )
        .await;

    let response = browser.get("/recover").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/dashboard");
}

#[tokio::test]
async fn test_recovery_sign_out() {
    let (app, _, server) = create_test_app();
    let user_id = server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    soft_delete(&server, &user_id);
    let mut browser = Browser::new(&app);
    browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD, "next": "/recover" }),
        )
        .await;

    let response = browser.post("/recover/sign-out", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let navigation = json_body(response).await;
    assert_eq!(navigation["location"], "/");
    assert_eq!(navigation["full_reload"], false);

    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["state"], "unauthenticated");
    assert!(server.profile(&user_id).unwrap().is_soft_deleted());
}

/// Browser signed in on the recovery view of a soft-deleted account.
async fn on_recovery_view(
    app: &axum::Router,
    server: &quillmate_auth::backend::MemoryIdentityServer,
) -> (Browser, String) {
    let user_id = server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    soft_delete(server, &user_id);
    let mut browser = Browser::new(app);
    browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD, "next": "/recover" }),
        )
        .await;
    assert_eq!(browser.get("/recover").await.status(), StatusCode::OK);
    (browser, user_id)
}

#[tokio::test]
async fn test_deleted_profile_only_reachable_through_recovery_view() {
    let (app, _, server) = create_test_app();
    let (mut browser, user_id) = on_recovery_view(&app, &server).await;

    let response = browser
        .patch("/api/profile", json!({ "bio": "edited while deleted" }))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_body(response).await["error"], "account_pending_deletion");

    let response = browser.get("/dashboard").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/recover");

    let response = browser
        .post("/auth/update-password", json!({ "password": "newpass1" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let row = server.profile(&user_id).unwrap();
    assert!(row.bio.is_none());
    assert!(row.is_soft_deleted());

    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["state"], "authenticated_pending_recovery");
}

#[tokio::test]
async fn test_failed_restore_stays_on_recovery_view() {
    let (app, _, server) = create_test_app();
    let (mut browser, user_id) = on_recovery_view(&app, &server).await;
    server.fail_account_recoveries(true);

    let response = browser.post("/recover/restore", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        json_body(response).await["details"],
        "Account recovery is temporarily unavailable"
    );

    // A reload would have remounted under enforcement and signed out.
    assert_eq!(server.sign_out_calls(), 0);
    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["state"], "authenticated_pending_recovery");
    assert_eq!(session["policy"], "recovery");
    assert!(server.profile(&user_id).unwrap().is_soft_deleted());

    assert_eq!(browser.get("/recover").await.status(), StatusCode::OK);

    // Retrying once the service recovers works.
    server.fail_account_recoveries(false);
    let response = browser.post("/recover/restore", json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["location"], "/dashboard");
}

#[tokio::test]
async fn test_restore_that_leaves_markers_is_reported() {
    let (app, _, server) = create_test_app();
    let (mut browser, user_id) = on_recovery_view(&app, &server).await;
    server.ignore_account_recoveries(true);

    let response = browser.post("/recover/restore", json!({})).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        json_body(response).await["details"],
        "Account could not be restored. Please try again."
    );

    assert_eq!(server.sign_out_calls(), 0);
    assert!(server.profile(&user_id).unwrap().is_soft_deleted());
    let response = browser.get("/recover").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["full_name"], "Alice");
}

#[tokio::test]
async fn test_failed_recovery_sign_in_keeps_enforcement() {
    let (app, _, server) = create_test_app();
    let user_id = server.create_user(ALICE_EMAIL, ALICE_PASSWORD, "Alice");
    soft_delete(&server, &user_id);
    let mut browser = Browser::new(&app);

    let response = browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": "wrongpass", "next": "/recover?from=email" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let session = json_body(browser.get("/api/session").await).await;
    assert_eq!(session["policy"], "enforce");

    // The query string does not hide the recovery target.
    let response = browser
        .post(
            "/auth/sign-in",
            json!({ "email": ALICE_EMAIL, "password": ALICE_PASSWORD, "next": "/recover?from=email" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["redirect_to"], "/recover?from=email");
    assert_eq!(body["session"]["state"], "authenticated_pending_recovery");
}
