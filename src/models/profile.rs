//! Profile row model for storage and API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Subscription plan attached to a profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Team,
}

/// Account status column. Unknown values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(feature = "binding-generation", ts(type = "string"))]
pub enum ProfileStatus {
    #[default]
    Active,
    Deleted,
    Other(String),
}

impl From<String> for ProfileStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "active" => Self::Active,
            "deleted" => Self::Deleted,
            _ => Self::Other(value),
        }
    }
}

impl From<ProfileStatus> for String {
    fn from(value: ProfileStatus) -> Self {
        match value {
            ProfileStatus::Active => "active".to_string(),
            ProfileStatus::Deleted => "deleted".to_string(),
            ProfileStatus::Other(s) => s,
        }
    }
}

/// Profile row, keyed 1:1 by the user's identity ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct Profile {
    /// Identity ID (primary key)
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub plan: Plan,
    /// Set when the account is scheduled for deletion
    #[serde(default)]
    #[cfg_attr(feature = "binding-generation", ts(type = "string | null"))]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: ProfileStatus,
}

impl Profile {
    /// Blank active profile for a freshly created account.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_name: None,
            avatar_url: None,
            bio: None,
            plan: Plan::Free,
            deleted_at: None,
            status: ProfileStatus::Active,
        }
    }

    /// A soft-deleted profile must never back an active session.
    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some() || self.status == ProfileStatus::Deleted
    }

    /// Apply a partial self-service update.
    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(name) = &update.full_name {
            self.full_name = Some(name.clone());
        }
        if let Some(url) = &update.avatar_url {
            self.avatar_url = Some(url.clone());
        }
        if let Some(bio) = &update.bio {
            self.bio = Some(bio.clone());
        }
    }
}

/// Self-service profile edit. Absent fields are left untouched.
///
/// Plan and soft-delete markers are deliberately not writable here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(url(message = "Avatar must be a valid URL"))]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 500, message = "Bio must be at most 500 characters"))]
    pub bio: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.avatar_url.is_none() && self.bio.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_delete_by_timestamp_or_status() {
        let mut profile = Profile::new("u1");
        assert!(!profile.is_soft_deleted());

        profile.deleted_at = Some(Utc::now());
        assert!(profile.is_soft_deleted());

        profile.deleted_at = None;
        profile.status = ProfileStatus::Deleted;
        assert!(profile.is_soft_deleted());
    }

    #[test]
    fn test_deserialize_row_with_defaults() {
        let row = serde_json::json!({
            "id": "u1",
            "full_name": "Jane Doe",
            "deleted_at": "2026-01-01T00:00:00Z",
            "status": "deleted"
        });
        let profile: Profile = serde_json::from_value(row).unwrap();

        assert_eq!(profile.full_name.as_deref(), Some("Jane Doe"));
        assert_eq!(profile.plan, Plan::Free);
        assert_eq!(profile.status, ProfileStatus::Deleted);
        assert!(profile.is_soft_deleted());
    }

    #[test]
    fn test_unknown_status_preserved() {
        let row = serde_json::json!({ "id": "u1", "status": "suspended", "plan": "team" });
        let profile: Profile = serde_json::from_value(row).unwrap();

        assert_eq!(profile.status, ProfileStatus::Other("suspended".to_string()));
        assert_eq!(profile.plan, Plan::Team);
        assert!(!profile.is_soft_deleted());

        let back = serde_json::to_value(&profile).unwrap();
        assert_eq!(back["status"], "suspended");
    }

    #[test]
    fn test_update_validation() {
        let ok = ProfileUpdate {
            bio: Some("hello".to_string()),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());

        let empty_name = ProfileUpdate {
            full_name: Some(String::new()),
            ..Default::default()
        };
        assert!(empty_name.validate().is_err());

        let bad_avatar = ProfileUpdate {
            avatar_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(bad_avatar.validate().is_err());
    }

    #[test]
    fn test_apply_partial_update() {
        let mut profile = Profile::new("u1");
        profile.full_name = Some("Jane".to_string());

        profile.apply(&ProfileUpdate {
            bio: Some("hello".to_string()),
            ..Default::default()
        });

        assert_eq!(profile.full_name.as_deref(), Some("Jane"));
        assert_eq!(profile.bio.as_deref(), Some("hello"));
    }
}
