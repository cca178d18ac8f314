// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Actions offered by the account recovery view.

use super::guards::{DASHBOARD_PATH, LANDING_PATH};
use super::session_store::SessionStore;
use crate::error::AuthError;
use serde::Serialize;

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Where the browser goes after a recovery action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Navigation {
    pub location: String,
    /// Discard all in-memory auth state before navigating.
    pub full_reload: bool,
}

/// Restore a soft-deleted account.
///
/// The profile is re-read afterwards; if the deletion markers are still
/// present the restore is reported as failed and the view stays put.
pub async fn restore(store: &SessionStore) -> Result<Navigation, AuthError> {
    let user = store
        .snapshot()
        .user
        .ok_or(AuthError::NotAuthenticated)?;

    store.backend().recover_account().await?;

    let still_deleted = store
        .backend()
        .fetch_profile(&user.id)
        .await?
        .is_some_and(|profile| profile.is_soft_deleted());
    if still_deleted {
        tracing::warn!(user_id = %user.id, "Account restore did not clear deletion markers");
        return Err(AuthError::Backend(
            "Account could not be restored. Please try again.".to_string(),
        ));
    }

    tracing::info!(user_id = %user.id, "Account restored");
    Ok(Navigation {
        location: DASHBOARD_PATH.to_string(),
        full_reload: true,
    })
}

/// Leave the recovery view signed out. Never fails.
pub async fn sign_out(store: &SessionStore) -> Navigation {
    store.sign_out().await;
    Navigation {
        location: LANDING_PATH.to_string(),
        full_reload: false,
    }
}
