pub mod auth;
pub mod cache;
pub mod error;
pub mod group;
pub mod guard;
pub mod message;
pub mod rooms;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use huddle_db::DbPool;

/// Worker id stamped into every snowflake this process generates.
pub const SNOWFLAKE_WORKER_ID: u16 = 1;

pub(crate) fn next_id() -> i64 {
    huddle_util::snowflake::generate(SNOWFLAKE_WORKER_ID)
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub cache: cache::ReadThroughCache,
    /// Live realtime rooms. Empty when no socket is connected.
    pub rooms: Arc<rooms::RoomRegistry>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(db: DbPool, cache: cache::ReadThroughCache, config: AppConfig) -> Self {
        Self {
            db,
            cache,
            rooms: Arc::new(rooms::RoomRegistry::new()),
            config,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub refresh_secret: String,
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    /// Adds `Secure` to auth cookies. Off only for plain-HTTP development.
    pub secure_cookies: bool,
    /// Direct threads only change through send/delete, both of which invalidate.
    pub direct_thread_ttl: Duration,
    /// Kept short to bound staleness left by any missed invalidation.
    pub group_thread_ttl: Duration,
}

impl AppConfig {
    pub fn new(jwt_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_token_ttl_seconds: 24 * 60 * 60,
            refresh_token_ttl_seconds: 10 * 24 * 60 * 60,
            secure_cookies: true,
            direct_thread_ttl: Duration::from_secs(3600),
            group_thread_ttl: Duration::from_secs(60),
        }
    }
}
