use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::group::{GroupSummary, SenderRole};
use crate::user::UserProfile;

/// The single destination of a message. A message addressed to both a user
/// and a group (or to neither) cannot be represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Addressee {
    #[serde(rename = "receiverUser")]
    User(#[serde(with = "crate::id")] i64),
    #[serde(rename = "receiverGroup")]
    Group(#[serde(with = "crate::id")] i64),
}

impl Addressee {
    pub fn from_columns(user: Option<i64>, group: Option<i64>) -> Option<Self> {
        match (user, group) {
            (Some(user_id), None) => Some(Self::User(user_id)),
            (None, Some(group_id)) => Some(Self::Group(group_id)),
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::User(id) => Some(*id),
            Self::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::Group(id) => Some(*id),
            Self::User(_) => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(with = "crate::id")]
    pub id: i64,
    #[serde(rename = "sender", with = "crate::id")]
    pub sender_id: i64,
    #[serde(flatten)]
    pub receiver: Addressee,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectThreadEntry {
    #[serde(flatten)]
    pub message: Message,
    pub sender_details: UserProfile,
    pub receiver_user_details: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupThreadEntry {
    #[serde(flatten)]
    pub message: Message,
    pub sender_details: UserProfile,
    pub sender_role: SenderRole,
}

/// Latest message exchanged with one counterpart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub message: Message,
    pub sender_details: UserProfile,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub receiver_user_details: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub group_details: Option<GroupSummary>,
}
