use crate::{datetime_from_db_text, is_unique_violation, now_db_text, placeholders, DbError, DbPool};
use chrono::{DateTime, Utc};
use huddle_models::user::{User, UserProfile};
use sqlx::Row;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, public_key, refresh_token, created_at";

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub public_key: String,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for UserRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            public_key: row.try_get("public_key")?,
            refresh_token: row.try_get("refresh_token")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }

    /// The user as shown to its owner: no password hash, no refresh token.
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            public_key: self.public_key.clone(),
            created_at: self.created_at,
        }
    }
}

pub async fn create_user(
    pool: &DbPool,
    id: i64,
    username: &str,
    email: &str,
    password_hash: &str,
    public_key: &str,
) -> Result<UserRow, DbError> {
    let sql = format!(
        "INSERT INTO users (id, username, email, password_hash, public_key, created_at)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING {USER_COLUMNS}"
    );
    sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(public_key)
        .bind(now_db_text())
        .fetch_one(pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DbError::Conflict("username or email already taken".to_string())
            } else {
                DbError::Sqlx(err)
            }
        })
}

pub async fn get_user_by_id(pool: &DbPool, id: i64) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_user_by_username(
    pool: &DbPool,
    username: &str,
) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(username)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Any user already holding either unique field.
pub async fn find_by_username_or_email(
    pool: &DbPool,
    username: &str,
    email: &str,
) -> Result<Option<UserRow>, DbError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $2 LIMIT 1");
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(username)
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn set_refresh_token(
    pool: &DbPool,
    id: i64,
    refresh_token: Option<&str>,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
        .bind(id)
        .bind(refresh_token)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

pub async fn search_users(
    pool: &DbPool,
    query: &str,
    exclude_id: i64,
    limit: i64,
) -> Result<Vec<UserRow>, DbError> {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{}%", escaped.to_lowercase());
    let sql = format!(
        "SELECT {USER_COLUMNS} FROM users
         WHERE lower(username) LIKE $1 ESCAPE '\\' AND id != $2
         ORDER BY username ASC
         LIMIT $3"
    );
    let rows = sqlx::query_as::<_, UserRow>(&sql)
        .bind(pattern)
        .bind(exclude_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Display details for a set of users, returned in the order of `ids`.
/// Unknown ids are skipped.
pub async fn get_profiles(pool: &DbPool, ids: &[i64]) -> Result<Vec<UserProfile>, DbError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, username, email FROM users WHERE id IN ({})",
        placeholders(1, ids.len())
    );
    let mut query = sqlx::query(&sql);
    for id in ids {
        query = query.bind(*id);
    }
    let rows = query.fetch_all(pool).await?;

    let mut found = Vec::with_capacity(rows.len());
    for row in rows {
        found.push(UserProfile {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
        });
    }
    Ok(ids
        .iter()
        .filter_map(|id| found.iter().find(|p| p.id == *id).cloned())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{migrated_pool, seed_user};

    #[tokio::test]
    async fn duplicate_username_is_a_conflict() {
        let pool = migrated_pool().await;
        seed_user(&pool, "alice").await;
        let err = create_user(&pool, 999, "alice", "other@example.com", "h", "")
            .await
            .expect_err("duplicate");
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn refresh_token_can_be_set_and_cleared() {
        let pool = migrated_pool().await;
        let id = seed_user(&pool, "alice").await;

        set_refresh_token(&pool, id, Some("r1")).await.expect("set");
        let row = get_user_by_id(&pool, id).await.expect("get").expect("row");
        assert_eq!(row.refresh_token.as_deref(), Some("r1"));

        set_refresh_token(&pool, id, None).await.expect("clear");
        let row = get_user_by_id(&pool, id).await.expect("get").expect("row");
        assert!(row.refresh_token.is_none());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_skips_caller() {
        let pool = migrated_pool().await;
        let alice = seed_user(&pool, "alice").await;
        seed_user(&pool, "Alicia").await;
        seed_user(&pool, "bob").await;

        let rows = search_users(&pool, "ALI", alice, 20).await.expect("search");
        let names: Vec<_> = rows.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["Alicia"]);
    }

    #[tokio::test]
    async fn profiles_follow_requested_order() {
        let pool = migrated_pool().await;
        let a = seed_user(&pool, "a1").await;
        let b = seed_user(&pool, "b1").await;
        let profiles = get_profiles(&pool, &[b, 12345, a]).await.expect("profiles");
        let ids: Vec<_> = profiles.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
