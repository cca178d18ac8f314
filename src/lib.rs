// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Quillmate auth: session and account-recovery core for the Quillmate
//! writing assistant.
//!
//! This crate provides the per-browser auth state machine (session store,
//! profile reconciliation, route guards) and the HTTP backend-for-frontend
//! that hosts it in front of a GoTrue-compatible identity service.

pub mod backend;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use services::ContextRegistry;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub contexts: ContextRegistry,
}
