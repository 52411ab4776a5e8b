//! Ownership checks shared by every mutating group and message operation.

use std::future::Future;

use huddle_db::groups::GroupRow;
use huddle_db::messages::MessageRow;
use huddle_db::{DbError, DbPool};

use crate::error::CoreError;

/// How much trust an operation needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Owner, or an admin when the resource has admins.
    Manage,
    /// Owner only. Used for irreversible operations.
    Destructive,
}

/// A resource with a single owning user.
pub trait OwnedResource: Sized + Send {
    const KIND: &'static str;

    fn load(pool: &DbPool, id: i64) -> impl Future<Output = Result<Option<Self>, DbError>> + Send;

    fn owner_id(&self) -> i64;

    /// Users with delegated management rights, if the resource has any.
    fn admin_ids(&self) -> Option<&[i64]> {
        None
    }
}

impl OwnedResource for GroupRow {
    const KIND: &'static str = "Group";

    async fn load(pool: &DbPool, id: i64) -> Result<Option<Self>, DbError> {
        huddle_db::groups::get_group(pool, id).await
    }

    fn owner_id(&self) -> i64 {
        self.owner_id
    }

    fn admin_ids(&self) -> Option<&[i64]> {
        Some(&self.admins)
    }
}

impl OwnedResource for MessageRow {
    const KIND: &'static str = "Message";

    async fn load(pool: &DbPool, id: i64) -> Result<Option<Self>, DbError> {
        huddle_db::messages::get_message(pool, id).await
    }

    /// A message belongs to whoever sent it.
    fn owner_id(&self) -> i64 {
        self.sender_id
    }
}

/// Proof that `actor` passed the guard for `resource`.
#[derive(Debug)]
pub struct Authorized<R> {
    pub resource: R,
    pub actor: i64,
    pub as_owner: bool,
}

/// Load resource `id` and check that `actor` may act on it with `access`.
pub async fn authorize<R: OwnedResource>(
    pool: &DbPool,
    id: i64,
    actor: i64,
    access: Access,
) -> Result<Authorized<R>, CoreError> {
    let resource = R::load(pool, id)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("{} not found", R::KIND)))?;

    if resource.owner_id() == actor {
        return Ok(Authorized {
            resource,
            actor,
            as_owner: true,
        });
    }

    let is_admin = resource
        .admin_ids()
        .is_some_and(|admins| admins.contains(&actor));
    if access == Access::Manage && is_admin {
        return Ok(Authorized {
            resource,
            actor,
            as_owner: false,
        });
    }

    tracing::debug!(kind = R::KIND, id, actor, ?access, "guard rejected actor");
    Err(CoreError::forbidden(format!(
        "You are not allowed to modify this {}",
        R::KIND.to_ascii_lowercase()
    )))
}
