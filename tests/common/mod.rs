// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::body::Body;
use axum::http::{header, Request, Response};
use quillmate_auth::backend::{IdentityBackend, MemoryIdentity, MemoryIdentityServer};
use quillmate_auth::config::Config;
use quillmate_auth::routes::create_router;
use quillmate_auth::services::{ContextRegistry, SessionStore};
use quillmate_auth::AppState;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const ALICE_EMAIL: &str = "a@x.com";
pub const ALICE_PASSWORD: &str = "correct-horse";

/// Sign-up code every fixture server issues.
pub const FIXED_CODE: &str = "12345678";

/// Memory identity server that issues `FIXED_CODE` for every sign-up.
#[allow(dead_code)]
pub fn test_server() -> Arc<MemoryIdentityServer> {
    MemoryIdentityServer::with_fixed_code(FIXED_CODE)
}

/// A store over a fresh client, not yet attached or initialized.
#[allow(dead_code)]
pub fn test_store(server: &Arc<MemoryIdentityServer>) -> (SessionStore, Arc<MemoryIdentity>) {
    let client = server.client();
    let store = SessionStore::new(client.clone() as Arc<dyn IdentityBackend>);
    (store, client)
}

/// Create a test app backed by the memory identity service.
/// Returns the router, the shared state and the identity server.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, Arc<AppState>, Arc<MemoryIdentityServer>) {
    let config = Config::test_default();
    let server = test_server();

    let factory_server = server.clone();
    let contexts = ContextRegistry::new(Arc::new(move || {
        factory_server.client() as Arc<dyn IdentityBackend>
    }));

    let state = Arc::new(AppState { config, contexts });
    (create_router(state.clone()), state, server)
}

/// One browser: remembers its context cookie across requests.
#[allow(dead_code)]
pub struct Browser {
    app: axum::Router,
    cookie: Option<String>,
}

#[allow(dead_code)]
impl Browser {
    pub fn new(app: &axum::Router) -> Self {
        Self {
            app: app.clone(),
            cookie: None,
        }
    }

    pub async fn get(&mut self, uri: &str) -> Response<Body> {
        self.send("GET", uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> Response<Body> {
        self.send("POST", uri, Some(body)).await
    }

    pub async fn patch(&mut self, uri: &str, body: Value) -> Response<Body> {
        self.send("PATCH", uri, Some(body)).await
    }

    pub async fn send(&mut self, method: &str, uri: &str, body: Option<Value>) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();

        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap();
            self.cookie = Some(pair.to_string());
        }
        response
    }
}

/// Read a response body as JSON.
#[allow(dead_code)]
pub async fn json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Path and query of a redirect target, dropping any scheme and host.
#[allow(dead_code)]
pub fn location(response: &Response<Body>) -> String {
    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("redirect has a Location")
        .to_str()
        .unwrap();
    match location.split_once("://") {
        Some((_, rest)) => rest
            .find('/')
            .map(|i| rest[i..].to_string())
            .unwrap_or_else(|| "/".to_string()),
        None => location.to_string(),
    }
}
