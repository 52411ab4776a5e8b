use crate::{datetime_from_db_text, now_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use huddle_models::group::GroupSummary;
use huddle_models::message::{Addressee, ConversationSummary, DirectThreadEntry, Message};
use huddle_models::user::UserProfile;
use sqlx::any::AnyRow;
use sqlx::Row;
use std::collections::HashSet;

const MESSAGE_COLUMNS: &str = "m.id AS id, m.sender_id AS sender_id, \
     m.receiver_user_id AS receiver_user_id, m.receiver_group_id AS receiver_group_id, \
     m.content AS content, m.created_at AS created_at";

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver: Addressee,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, AnyRow> for MessageRow {
    fn from_row(row: &'r AnyRow) -> Result<Self, sqlx::Error> {
        let id: i64 = row.try_get("id")?;
        let receiver_user: Option<i64> = row.try_get("receiver_user_id")?;
        let receiver_group: Option<i64> = row.try_get("receiver_group_id")?;
        let receiver = Addressee::from_columns(receiver_user, receiver_group).ok_or_else(|| {
            sqlx::Error::Protocol(format!("message {id} must have exactly one receiver"))
        })?;
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id,
            sender_id: row.try_get("sender_id")?,
            receiver,
            content: row.try_get("content")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl MessageRow {
    pub fn to_message(&self) -> Message {
        Message {
            id: self.id,
            sender_id: self.sender_id,
            receiver: self.receiver,
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}

/// A group-thread row before the sender's role is derived.
#[derive(Debug, Clone)]
pub struct GroupThreadRow {
    pub message: MessageRow,
    pub sender: UserProfile,
}

fn profile_from_row(
    row: &AnyRow,
    id_column: &str,
    prefix: &str,
) -> Result<Option<UserProfile>, sqlx::Error> {
    let id: Option<i64> = row.try_get(id_column)?;
    let username: Option<String> = row.try_get(format!("{prefix}_username").as_str())?;
    let email: Option<String> = row.try_get(format!("{prefix}_email").as_str())?;
    Ok(match (id, username, email) {
        (Some(id), Some(username), Some(email)) => Some(UserProfile { id, username, email }),
        _ => None,
    })
}

fn missing_profile(message_id: i64) -> sqlx::Error {
    sqlx::Error::Protocol(format!("message {message_id} references an unknown user"))
}

pub async fn create_message(
    pool: &DbPool,
    id: i64,
    sender_id: i64,
    receiver: Addressee,
    content: &str,
) -> Result<MessageRow, DbError> {
    let row = sqlx::query_as::<_, MessageRow>(
        "INSERT INTO messages (id, sender_id, receiver_user_id, receiver_group_id, content, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id, sender_id, receiver_user_id, receiver_group_id, content, created_at",
    )
    .bind(id)
    .bind(sender_id)
    .bind(receiver.user_id())
    .bind(receiver.group_id())
    .bind(content)
    .bind(now_db_text())
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_message(pool: &DbPool, id: i64) -> Result<Option<MessageRow>, DbError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1");
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Deletes the message only if `sender_id` wrote it.
pub async fn delete_message_by_sender(
    pool: &DbPool,
    id: i64,
    sender_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM messages WHERE id = $1 AND sender_id = $2")
        .bind(id)
        .bind(sender_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Both directions between two users, oldest first.
pub async fn direct_thread(
    pool: &DbPool,
    user_a: i64,
    user_b: i64,
) -> Result<Vec<DirectThreadEntry>, DbError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS},
                su.username AS sender_username, su.email AS sender_email,
                ru.username AS receiver_username, ru.email AS receiver_email
         FROM messages m
         JOIN users su ON su.id = m.sender_id
         JOIN users ru ON ru.id = m.receiver_user_id
         WHERE (m.sender_id = $1 AND m.receiver_user_id = $2)
            OR (m.sender_id = $2 AND m.receiver_user_id = $1)
         ORDER BY m.created_at ASC, m.id ASC"
    );
    let rows = sqlx::query(&sql)
        .bind(user_a)
        .bind(user_b)
        .fetch_all(pool)
        .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let message = <MessageRow as sqlx::FromRow<AnyRow>>::from_row(row)?;
        let sender_details = profile_from_row(row, "sender_id", "sender")?
            .ok_or_else(|| missing_profile(message.id))?;
        let receiver_user_details = profile_from_row(row, "receiver_user_id", "receiver")?
            .ok_or_else(|| missing_profile(message.id))?;
        entries.push(DirectThreadEntry {
            message: message.to_message(),
            sender_details,
            receiver_user_details,
        });
    }
    Ok(entries)
}

/// Messages addressed to one group, oldest first, with sender details.
pub async fn group_thread(pool: &DbPool, group_id: i64) -> Result<Vec<GroupThreadRow>, DbError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}, su.username AS sender_username, su.email AS sender_email
         FROM messages m
         JOIN users su ON su.id = m.sender_id
         WHERE m.receiver_group_id = $1
         ORDER BY m.created_at ASC, m.id ASC"
    );
    let rows = sqlx::query(&sql).bind(group_id).fetch_all(pool).await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let message = <MessageRow as sqlx::FromRow<AnyRow>>::from_row(row)?;
        let sender = profile_from_row(row, "sender_id", "sender")?
            .ok_or_else(|| missing_profile(message.id))?;
        entries.push(GroupThreadRow { message, sender });
    }
    Ok(entries)
}

/// One row per counterpart the user has a conversation with, newest first.
///
/// Direct counterparts are the other party of any message the user sent or
/// received. Group counterparts are existing groups the user owns or holds a
/// role in, provided the group has at least one message.
pub async fn conversation_list(
    pool: &DbPool,
    user_id: i64,
) -> Result<Vec<ConversationSummary>, DbError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS},
                su.username AS sender_username, su.email AS sender_email,
                ru.username AS receiver_username, ru.email AS receiver_email,
                g.name AS group_name
         FROM messages m
         JOIN users su ON su.id = m.sender_id
         LEFT JOIN users ru ON ru.id = m.receiver_user_id
         LEFT JOIN chat_groups g ON g.id = m.receiver_group_id
         WHERE (m.receiver_user_id IS NOT NULL AND (m.sender_id = $1 OR m.receiver_user_id = $1))
            OR (g.id IS NOT NULL AND (
                    g.owner_id = $1
                    OR EXISTS (SELECT 1 FROM group_roles gr WHERE gr.group_id = g.id AND gr.user_id = $1)))
         ORDER BY m.created_at DESC, m.id DESC"
    );
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;

    let mut seen: HashSet<Addressee> = HashSet::new();
    let mut summaries = Vec::new();
    for row in &rows {
        let message = <MessageRow as sqlx::FromRow<AnyRow>>::from_row(row)?;
        let counterpart = match message.receiver {
            Addressee::User(receiver) if message.sender_id == user_id => Addressee::User(receiver),
            Addressee::User(_) => Addressee::User(message.sender_id),
            Addressee::Group(group_id) => Addressee::Group(group_id),
        };
        if !seen.insert(counterpart) {
            continue;
        }

        let sender_details = profile_from_row(row, "sender_id", "sender")?
            .ok_or_else(|| missing_profile(message.id))?;
        let receiver_user_details = profile_from_row(row, "receiver_user_id", "receiver")?;
        let group_details = match message.receiver {
            Addressee::Group(id) => {
                let name: Option<String> = row.try_get("group_name")?;
                name.map(|name| GroupSummary { id, name })
            }
            Addressee::User(_) => None,
        };
        summaries.push(ConversationSummary {
            message: message.to_message(),
            sender_details,
            receiver_user_details,
            group_details,
        });
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups;
    use crate::test_support::{migrated_pool, seed_user};

    async fn send(pool: &DbPool, id: i64, from: i64, to: Addressee, text: &str) -> MessageRow {
        create_message(pool, id, from, to, text).await.expect("create message")
    }

    #[tokio::test]
    async fn direct_thread_includes_both_directions_in_order() {
        let pool = migrated_pool().await;
        let alice = seed_user(&pool, "alice").await;
        let bob = seed_user(&pool, "bob").await;
        let carol = seed_user(&pool, "carol").await;

        send(&pool, 1, alice, Addressee::User(bob), "one").await;
        send(&pool, 2, bob, Addressee::User(alice), "two").await;
        send(&pool, 3, alice, Addressee::User(carol), "elsewhere").await;
        send(&pool, 4, alice, Addressee::User(bob), "three").await;

        let thread = direct_thread(&pool, bob, alice).await.expect("thread");
        let texts: Vec<_> = thread.iter().map(|e| e.message.content.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert_eq!(thread[1].sender_details.username, "bob");
        assert_eq!(thread[1].receiver_user_details.username, "alice");
    }

    #[tokio::test]
    async fn delete_only_matches_the_sender() {
        let pool = migrated_pool().await;
        let alice = seed_user(&pool, "alice").await;
        let bob = seed_user(&pool, "bob").await;
        send(&pool, 1, alice, Addressee::User(bob), "mine").await;

        assert!(!delete_message_by_sender(&pool, 1, bob).await.expect("delete"));
        assert!(delete_message_by_sender(&pool, 1, alice).await.expect("delete"));
        assert!(get_message(&pool, 1).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn conversation_list_keeps_latest_per_counterpart() {
        let pool = migrated_pool().await;
        let alice = seed_user(&pool, "alice").await;
        let bob = seed_user(&pool, "bob").await;
        let carol = seed_user(&pool, "carol").await;
        groups::create_group(&pool, 50, "Eng", carol).await.expect("group");
        groups::add_member(&pool, 50, alice).await.expect("member");
        groups::create_group(&pool, 60, "Secret", carol).await.expect("group");

        send(&pool, 1, alice, Addressee::User(bob), "first").await;
        send(&pool, 2, bob, Addressee::User(alice), "reply").await;
        send(&pool, 3, carol, Addressee::Group(50), "standup").await;
        send(&pool, 4, carol, Addressee::Group(60), "hidden").await;

        let list = conversation_list(&pool, alice).await.expect("list");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].message.content, "standup");
        assert_eq!(list[0].group_details.as_ref().map(|g| g.name.as_str()), Some("Eng"));
        assert_eq!(list[1].message.content, "reply");
        assert_eq!(list[1].sender_details.username, "bob");
    }

    #[tokio::test]
    async fn group_thread_lists_messages_with_sender_details() {
        let pool = migrated_pool().await;
        let carol = seed_user(&pool, "carol").await;
        groups::create_group(&pool, 50, "Eng", carol).await.expect("group");
        send(&pool, 1, carol, Addressee::Group(50), "a").await;
        send(&pool, 2, carol, Addressee::Group(50), "b").await;

        let rows = group_thread(&pool, 50).await.expect("thread");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sender.username, "carol");
        assert_eq!(rows[1].message.content, "b");
    }
}
