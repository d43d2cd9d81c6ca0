use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Columns selected when the profile page loads.
pub const PROFILE_PROJECTION: &str = "username,full_name,avatar_url";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfileRow {
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Full `profiles` row, as returned by a write with `return=representation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ProfileRecord> for ProfileRow {
    fn from(record: ProfileRecord) -> Self {
        Self {
            username: record.username,
            full_name: record.full_name,
            avatar_url: record.avatar_url,
        }
    }
}

/// Partial update of a profile row. Absent fields are left untouched remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProfilePatch {
    pub fn details(
        username: Option<String>,
        full_name: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            username,
            full_name,
            avatar_url: None,
            updated_at,
        }
    }

    pub fn avatar(avatar_url: String, updated_at: DateTime<Utc>) -> Self {
        Self {
            username: None,
            full_name: None,
            avatar_url: Some(avatar_url),
            updated_at,
        }
    }

    /// Applies the patch onto an existing record.
    pub fn apply(&self, record: &mut ProfileRecord) {
        if let Some(username) = &self.username {
            record.username = Some(username.clone());
        }
        if let Some(full_name) = &self.full_name {
            record.full_name = Some(full_name.clone());
        }
        if let Some(avatar_url) = &self.avatar_url {
            record.avatar_url = Some(avatar_url.clone());
        }
        record.updated_at = Some(self.updated_at);
    }
}
