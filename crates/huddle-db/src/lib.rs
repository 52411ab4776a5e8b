pub mod groups;
pub mod messages;
pub mod users;

use sqlx::any::AnyPoolOptions;
use thiserror::Error;

pub type DbPool = sqlx::AnyPool;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    if !database_url.trim().to_ascii_lowercase().starts_with("sqlite:") {
        return Err(sqlx::Error::Configuration(
            format!("unsupported database URL scheme in '{}'", database_url).into(),
        ));
    }

    // Required once before using sqlx::Any.
    sqlx::any::install_default_drivers();

    AnyPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA journal_mode = WAL;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA synchronous = NORMAL;")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations: applied successfully");
    Ok(())
}

/// Millisecond precision keeps rapid sends in creation order.
pub(crate) fn datetime_to_db_text(value: chrono::DateTime<chrono::Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn now_db_text() -> String {
    datetime_to_db_text(chrono::Utc::now())
}

pub(crate) fn datetime_from_db_text(
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, sqlx::Error> {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(sqlx::Error::Protocol(format!(
        "invalid datetime text '{}'",
        value
    )))
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Builds `($1, $2, ...)` style placeholder lists starting at `start`.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::{create_pool, run_migrations, DbPool};

    pub async fn migrated_pool() -> DbPool {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    pub async fn seed_user(pool: &DbPool, name: &str) -> i64 {
        let id = huddle_util::snowflake::generate(1);
        crate::users::create_user(
            pool,
            id,
            name,
            &format!("{name}@example.com"),
            "hash",
            "pk",
        )
        .await
        .expect("create user");
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_supports_in_memory_sqlite() {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        let value: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query");
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn rejects_non_sqlite_urls() {
        let err = create_pool("mysql://localhost/db", 1)
            .await
            .expect_err("unsupported scheme must fail");
        assert!(matches!(err, sqlx::Error::Configuration(_)));
    }

    #[tokio::test]
    async fn message_receiver_check_rejects_two_addressees() {
        let pool = test_support::migrated_pool().await;
        let alice = test_support::seed_user(&pool, "alice").await;
        let bob = test_support::seed_user(&pool, "bob").await;

        let result = sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_user_id, receiver_group_id, content, created_at)
             VALUES (1, $1, $2, 99, 'hi', $3)",
        )
        .bind(alice)
        .bind(bob)
        .bind(now_db_text())
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn datetime_text_round_trips_with_millis() {
        let now = chrono::Utc::now();
        let parsed = datetime_from_db_text(&datetime_to_db_text(now)).expect("parse");
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn placeholder_list_is_numbered_from_start() {
        assert_eq!(placeholders(2, 3), "$2, $3, $4");
    }
}
