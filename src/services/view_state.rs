// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use super::reconciler::ProfileSlot;
use crate::models::UserIdentity;
use serde::Serialize;

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Coarse auth state that views branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum AuthViewState {
    Loading,
    Unauthenticated,
    AuthenticatedActive,
    /// Signed in, account scheduled for deletion.
    AuthenticatedPendingRecovery,
}

impl AuthViewState {
    pub fn derive(loading: bool, user: Option<&UserIdentity>, profile: &ProfileSlot) -> Self {
        if loading {
            return Self::Loading;
        }
        match (user, profile) {
            (None, _) => Self::Unauthenticated,
            (Some(_), ProfileSlot::PendingRecovery(_)) => Self::AuthenticatedPendingRecovery,
            // A user whose row is missing is still signed in.
            (Some(_), _) => Self::AuthenticatedActive,
        }
    }
}
