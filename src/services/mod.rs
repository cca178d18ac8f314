// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - auth core.

pub mod context;
pub mod guards;
pub mod reconciler;
pub mod recovery;
pub mod session_store;
pub mod view_state;

pub use context::{AuthContext, ContextRegistry};
pub use guards::{recovery_gate, route_guard, GuardDecision};
pub use reconciler::{ProfileSlot, ReconcileOutcome, ReconcilePolicy};
pub use recovery::Navigation;
pub use session_store::{AuthSnapshot, SessionStore, Subscription};
pub use view_state::AuthViewState;
