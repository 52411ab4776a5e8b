use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display details attached to messages and group views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// A user as returned to its owner. Credentials never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(with = "crate::id")]
    pub id: i64,
    pub username: String,
    pub email: String,
    pub public_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub username: String,
    pub public_key: String,
}
