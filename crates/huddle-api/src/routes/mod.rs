pub mod groups;
pub mod messages;
pub mod users;

use crate::error::ApiError;

/// Path segment to snowflake id.
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<i64, ApiError> {
    huddle_util::snowflake::parse(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid {what} id")))
}
