// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Route protection decisions.
//!
//! Both guards are pure functions of the store snapshot. They are
//! re-evaluated on every request, so a decision is never cached.

use super::reconciler::ProfileSlot;
use super::session_store::AuthSnapshot;

pub const LANDING_PATH: &str = "/";
pub const SIGN_IN_PATH: &str = "/sign-in";
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const RECOVERY_PATH: &str = "/recover";
pub const UPDATE_PASSWORD_PATH: &str = "/update-password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// State not known yet; show a loading indicator.
    Wait,
    Redirect(String),
    Render,
}

/// Guard for protected pages.
///
/// The profile is not consulted: a signed-in user whose profile is absent
/// still renders.
pub fn route_guard(snapshot: &AuthSnapshot, requested: &str) -> GuardDecision {
    if snapshot.loading {
        return GuardDecision::Wait;
    }
    match snapshot.user {
        None => GuardDecision::Redirect(sign_in_redirect(requested)),
        Some(_) => GuardDecision::Render,
    }
}

/// Guard for the account recovery view. Conditions are checked in order.
pub fn recovery_gate(snapshot: &AuthSnapshot) -> GuardDecision {
    if snapshot.loading {
        return GuardDecision::Wait;
    }
    if snapshot.user.is_none() {
        return GuardDecision::Redirect(sign_in_redirect(RECOVERY_PATH));
    }
    match &snapshot.profile {
        ProfileSlot::Active(_) | ProfileSlot::Absent => {
            GuardDecision::Redirect(DASHBOARD_PATH.to_string())
        }
        ProfileSlot::Unresolved => GuardDecision::Wait,
        ProfileSlot::PendingRecovery(_) => GuardDecision::Render,
    }
}

/// `/sign-in?next=<path>`, with `next` percent-encoded.
pub fn sign_in_redirect(next: &str) -> String {
    format!(
        "{}?next={}",
        SIGN_IN_PATH,
        urlencoding::encode(&safe_next(Some(next)))
    )
}

/// Post-sign-in target. Only site-relative paths are honoured.
pub fn safe_next(next: Option<&str>) -> String {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains('\\') => {
            path.to_string()
        }
        _ => DASHBOARD_PATH.to_string(),
    }
}
