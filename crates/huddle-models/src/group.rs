use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::user::UserProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub name: String,
    #[serde(rename = "owner", with = "crate::id")]
    pub owner_id: i64,
    #[serde(with = "crate::id::list")]
    pub members: Vec<i64>,
    #[serde(with = "crate::id::list")]
    pub admins: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

/// Group with every participant resolved to display details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub name: String,
    pub owner: UserProfile,
    pub admins: Vec<UserProfile>,
    pub members: Vec<UserProfile>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub name: String,
}

/// Role of a message author inside the group it was sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Owner,
    Admin,
    Member,
}
