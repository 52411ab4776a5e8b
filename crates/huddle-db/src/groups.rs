use crate::{datetime_from_db_text, now_db_text, DbError, DbPool};
use chrono::{DateTime, Utc};
use huddle_models::group::Group;
use sqlx::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Member,
    Admin,
}

impl GroupRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
        }
    }
}

/// A group together with its role rows. `members` includes every admin;
/// the owner appears in neither list.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub members: Vec<i64>,
    pub admins: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

impl GroupRow {
    pub fn is_owner(&self, user_id: i64) -> bool {
        self.owner_id == user_id
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admins.contains(&user_id)
    }

    pub fn is_member(&self, user_id: i64) -> bool {
        self.members.contains(&user_id)
    }

    /// Owner, admin or member.
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.is_owner(user_id) || self.is_member(user_id)
    }

    pub fn to_group(&self) -> Group {
        Group {
            id: self.id,
            name: self.name.clone(),
            owner_id: self.owner_id,
            members: self.members.clone(),
            admins: self.admins.clone(),
            created_at: self.created_at,
        }
    }
}

pub async fn create_group(
    pool: &DbPool,
    id: i64,
    name: &str,
    owner_id: i64,
) -> Result<GroupRow, DbError> {
    let row = sqlx::query(
        "INSERT INTO chat_groups (id, name, owner_id, created_at)
         VALUES ($1, $2, $3, $4)
         RETURNING id, name, owner_id, created_at",
    )
    .bind(id)
    .bind(name)
    .bind(owner_id)
    .bind(now_db_text())
    .fetch_one(pool)
    .await?;
    let created_at_raw: String = row.try_get("created_at")?;
    Ok(GroupRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        members: Vec::new(),
        admins: Vec::new(),
        created_at: datetime_from_db_text(&created_at_raw)?,
    })
}

pub async fn get_group(pool: &DbPool, id: i64) -> Result<Option<GroupRow>, DbError> {
    let Some(row) = sqlx::query("SELECT id, name, owner_id, created_at FROM chat_groups WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let roles = sqlx::query(
        "SELECT user_id, role FROM group_roles WHERE group_id = $1 ORDER BY added_at ASC, user_id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut members = Vec::with_capacity(roles.len());
    let mut admins = Vec::new();
    for role_row in roles {
        let user_id: i64 = role_row.try_get("user_id")?;
        let role: String = role_row.try_get("role")?;
        members.push(user_id);
        if role == GroupRole::Admin.as_str() {
            admins.push(user_id);
        }
    }

    let created_at_raw: String = row.try_get("created_at")?;
    Ok(Some(GroupRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        members,
        admins,
        created_at: datetime_from_db_text(&created_at_raw)?,
    }))
}

/// Adds `user_id` as a plain member. Returns `false` when they already hold a role.
pub async fn add_member(pool: &DbPool, group_id: i64, user_id: i64) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO group_roles (group_id, user_id, role, added_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (group_id, user_id) DO NOTHING",
    )
    .bind(group_id)
    .bind(user_id)
    .bind(GroupRole::Member.as_str())
    .bind(now_db_text())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Drops the participant row, which removes membership and adminship together.
pub async fn remove_participant(
    pool: &DbPool,
    group_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM group_roles WHERE group_id = $1 AND user_id = $2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Removes `user_id` only while they are a plain member, never an admin.
pub async fn remove_plain_member(
    pool: &DbPool,
    group_id: i64,
    user_id: i64,
) -> Result<bool, DbError> {
    remove_with_role(pool, group_id, user_id, GroupRole::Member).await
}

/// Only a current plain member can be promoted.
pub async fn promote_admin(pool: &DbPool, group_id: i64, user_id: i64) -> Result<bool, DbError> {
    set_role(pool, group_id, user_id, GroupRole::Member, GroupRole::Admin).await
}

/// Strips adminship, keeping the membership row.
pub async fn demote_admin(pool: &DbPool, group_id: i64, user_id: i64) -> Result<bool, DbError> {
    set_role(pool, group_id, user_id, GroupRole::Admin, GroupRole::Member).await
}

/// Removes an admin from the group entirely.
pub async fn remove_admin(pool: &DbPool, group_id: i64, user_id: i64) -> Result<bool, DbError> {
    remove_with_role(pool, group_id, user_id, GroupRole::Admin).await
}

async fn remove_with_role(
    pool: &DbPool,
    group_id: i64,
    user_id: i64,
    role: GroupRole,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "DELETE FROM group_roles WHERE group_id = $1 AND user_id = $2 AND role = $3",
    )
    .bind(group_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn set_role(
    pool: &DbPool,
    group_id: i64,
    user_id: i64,
    from: GroupRole,
    to: GroupRole,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE group_roles SET role = $1
         WHERE group_id = $2 AND user_id = $3 AND role = $4",
    )
    .bind(to.as_str())
    .bind(group_id)
    .bind(user_id)
    .bind(from.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Role rows go with the group; messages addressed to it are left in place.
pub async fn delete_group(pool: &DbPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM chat_groups WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Every group the user owns or holds a role in.
pub async fn list_group_ids_for_user(pool: &DbPool, user_id: i64) -> Result<Vec<i64>, DbError> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM chat_groups WHERE owner_id = $1
         UNION
         SELECT group_id FROM group_roles WHERE user_id = $1
         ORDER BY 1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
