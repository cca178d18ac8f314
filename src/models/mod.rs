// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod profile;
pub mod user;

pub use profile::{Plan, Profile, ProfileStatus, ProfileUpdate};
pub use user::{AuthEvent, AuthEventKind, Session, UserIdentity};
