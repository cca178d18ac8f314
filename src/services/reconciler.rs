// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Profile reconciliation.
//!
//! After every session change the profile row is re-fetched and classified.
//! Each run carries the store generation it was started for; a run whose
//! generation has been superseded by a later session change or self-update
//! never writes.

use super::session_store::SessionStore;
use crate::error::AuthError;
use crate::models::Profile;
use serde::Serialize;

#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// What the store currently knows about the signed-in user's profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProfileSlot {
    /// No profile: no user, no row, fetch failed, or row withheld.
    #[default]
    Absent,
    /// User present, fetch not finished yet.
    Unresolved,
    Active(Profile),
    /// Soft-deleted row, held only while the recovery view is in charge.
    PendingRecovery(Profile),
}

impl ProfileSlot {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// The profile as other views may see it.
    pub fn active(&self) -> Option<&Profile> {
        match self {
            Self::Active(profile) => Some(profile),
            _ => None,
        }
    }
}

/// How soft-deleted profiles are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Withhold the profile and force sign-out.
    #[default]
    Enforce,
    /// Hold the profile for the recovery view; keep the session so the
    /// restore call is authenticated.
    Recovery,
}

/// Result of one reconcile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Soft-deleted profile detected; the session was torn down.
    ForcedSignOut,
    /// A newer session change superseded this run; its result was dropped.
    StaleReadIgnored,
    NoUser,
}

/// What a fetch result means for the store.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Slot(ProfileSlot),
    ForceSignOut,
}

/// Classify a fetch result under `policy`.
pub(crate) fn classify(
    fetched: Result<Option<Profile>, AuthError>,
    policy: ReconcilePolicy,
) -> Verdict {
    match fetched {
        Err(_) | Ok(None) => Verdict::Slot(ProfileSlot::Absent),
        Ok(Some(profile)) if profile.is_soft_deleted() => match policy {
            ReconcilePolicy::Enforce => Verdict::ForceSignOut,
            ReconcilePolicy::Recovery => Verdict::Slot(ProfileSlot::PendingRecovery(profile)),
        },
        Ok(Some(profile)) => Verdict::Slot(ProfileSlot::Active(profile)),
    }
}

/// Fetch and apply the profile for `user_id` as of `generation`.
pub(crate) async fn reconcile(
    store: SessionStore,
    user_id: String,
    generation: u64,
) -> ReconcileOutcome {
    let fetched = store.backend().fetch_profile(&user_id).await;
    if let Err(err) = &fetched {
        tracing::warn!(user_id = %user_id, error = %err, "Profile fetch failed, treating as absent");
    }

    match classify(fetched, store.policy()) {
        Verdict::Slot(slot) => {
            if store.apply_profile(generation, &user_id, slot) {
                ReconcileOutcome::Applied
            } else {
                tracing::debug!(user_id = %user_id, generation, "Discarding stale profile fetch");
                ReconcileOutcome::StaleReadIgnored
            }
        }
        Verdict::ForceSignOut => {
            // Withhold first so the row is never visible, even briefly.
            if !store.apply_profile(generation, &user_id, ProfileSlot::Absent) {
                tracing::debug!(user_id = %user_id, generation, "Discarding stale profile fetch");
                return ReconcileOutcome::StaleReadIgnored;
            }
            tracing::info!(user_id = %user_id, "Profile is scheduled for deletion, forcing sign-out");
            if store.force_sign_out(generation).await {
                ReconcileOutcome::ForcedSignOut
            } else {
                tracing::debug!(user_id = %user_id, generation, "Newer session arrived during forced sign-out");
                ReconcileOutcome::StaleReadIgnored
            }
        }
    }
}
