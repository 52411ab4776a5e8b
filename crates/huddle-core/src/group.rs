use huddle_db::groups::{self, GroupRow};
use huddle_models::group::GroupDetails;
use huddle_util::validation;

use crate::cache::group_thread_key;
use crate::error::CoreError;
use crate::guard::{authorize, Access, Authorized};
use crate::{next_id, AppState};

async fn reload(state: &AppState, group_id: i64) -> Result<GroupRow, CoreError> {
    groups::get_group(&state.db, group_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Group not found"))
}

/// Role changes alter the derived `senderRole` of cached group threads.
async fn roles_changed(state: &AppState, group_id: i64) -> Result<GroupRow, CoreError> {
    state.cache.invalidate([group_thread_key(group_id)]).await;
    reload(state, group_id).await
}

fn reject_owner_target(group: &GroupRow, target_id: i64) -> Result<(), CoreError> {
    if group.is_owner(target_id) {
        return Err(CoreError::forbidden("The group owner's role cannot be changed"));
    }
    Ok(())
}

pub async fn create_group(
    state: &AppState,
    owner_id: i64,
    name: Option<&str>,
) -> Result<GroupRow, CoreError> {
    let name = validation::required(name, "name")
        .map_err(|_| CoreError::validation("Group name is needed"))?;
    validation::validate_group_name(name)?;

    let group = groups::create_group(&state.db, next_id(), name, owner_id).await?;
    tracing::info!(group_id = group.id, owner_id, "group created");
    Ok(group)
}

pub async fn add_member(
    state: &AppState,
    actor: i64,
    group_id: i64,
    member_id: i64,
) -> Result<GroupRow, CoreError> {
    let Authorized { resource: group, .. } =
        authorize::<GroupRow>(&state.db, group_id, actor, Access::Manage).await?;

    if huddle_db::users::get_user_by_id(&state.db, member_id).await?.is_none() {
        return Err(CoreError::not_found("User not found"));
    }
    if group.is_owner(member_id) {
        return Err(CoreError::validation("The owner is already part of the group"));
    }
    if !groups::add_member(&state.db, group_id, member_id).await? {
        return Err(CoreError::validation("User already exists"));
    }

    tracing::info!(group_id, member_id, actor, "member added");
    reload(state, group_id).await
}

/// Removing a member who is also an admin takes the owner.
pub async fn remove_member(
    state: &AppState,
    actor: i64,
    group_id: i64,
    member_id: i64,
) -> Result<GroupRow, CoreError> {
    let authorized = authorize::<GroupRow>(&state.db, group_id, actor, Access::Manage).await?;
    let group = &authorized.resource;
    reject_owner_target(group, member_id)?;

    if !group.is_member(member_id) {
        return Err(CoreError::validation("User is not a member of this group"));
    }

    let removed = if authorized.as_owner {
        groups::remove_participant(&state.db, group_id, member_id).await?
    } else {
        if group.is_admin(member_id) {
            return Err(CoreError::forbidden("Only the owner can remove an admin"));
        }
        groups::remove_plain_member(&state.db, group_id, member_id).await?
    };
    if !removed {
        return Err(CoreError::Conflict(
            "Membership changed while removing, try again".into(),
        ));
    }

    tracing::info!(group_id, member_id, actor, "member removed");
    roles_changed(state, group_id).await
}

pub async fn promote_admin(
    state: &AppState,
    actor: i64,
    group_id: i64,
    member_id: i64,
) -> Result<GroupRow, CoreError> {
    let Authorized { resource: group, .. } =
        authorize::<GroupRow>(&state.db, group_id, actor, Access::Manage).await?;
    reject_owner_target(&group, member_id)?;

    if !group.is_member(member_id) {
        return Err(CoreError::validation("User isn't a member to be promoted"));
    }
    if group.is_admin(member_id) {
        return Err(CoreError::validation("User is already an admin"));
    }
    if !groups::promote_admin(&state.db, group_id, member_id).await? {
        return Err(CoreError::validation("User isn't a member to be promoted"));
    }

    tracing::info!(group_id, member_id, actor, "member promoted to admin");
    roles_changed(state, group_id).await
}

/// Strips adminship; the user stays a member.
pub async fn demote_admin(
    state: &AppState,
    actor: i64,
    group_id: i64,
    member_id: i64,
) -> Result<GroupRow, CoreError> {
    let Authorized { resource: group, .. } =
        authorize::<GroupRow>(&state.db, group_id, actor, Access::Manage).await?;
    reject_owner_target(&group, member_id)?;

    if !group.is_admin(member_id) {
        return Err(CoreError::validation("User is not an admin"));
    }
    if !groups::demote_admin(&state.db, group_id, member_id).await? {
        return Err(CoreError::validation("User is not an admin"));
    }

    tracing::info!(group_id, member_id, actor, "admin demoted");
    roles_changed(state, group_id).await
}

/// Owner-only: the admin loses both roles.
pub async fn remove_admin(
    state: &AppState,
    actor: i64,
    group_id: i64,
    admin_id: i64,
) -> Result<GroupRow, CoreError> {
    let Authorized { resource: group, .. } =
        authorize::<GroupRow>(&state.db, group_id, actor, Access::Destructive).await?;
    reject_owner_target(&group, admin_id)?;

    if !groups::remove_admin(&state.db, group_id, admin_id).await? {
        return Err(CoreError::validation("User is not an admin of this group"));
    }

    tracing::info!(group_id, admin_id, actor, "admin removed from group");
    roles_changed(state, group_id).await
}

/// Owner-only. Messages sent to the group stay in the store but no read path
/// reaches them once the group is gone.
pub async fn delete_group(state: &AppState, actor: i64, group_id: i64) -> Result<(), CoreError> {
    authorize::<GroupRow>(&state.db, group_id, actor, Access::Destructive).await?;
    groups::delete_group(&state.db, group_id).await?;
    state.cache.invalidate([group_thread_key(group_id)]).await;
    tracing::info!(group_id, actor, "group deleted");
    Ok(())
}

/// Group with owner, admin and member profiles. Participants only.
pub async fn group_details(
    state: &AppState,
    viewer: i64,
    group_id: i64,
) -> Result<GroupDetails, CoreError> {
    let group = reload(state, group_id).await?;
    if !group.is_participant(viewer) {
        return Err(CoreError::forbidden("You are not a member of this group"));
    }

    let owner = huddle_db::users::get_profiles(&state.db, &[group.owner_id])
        .await?
        .pop()
        .ok_or_else(|| CoreError::Internal(format!("group {group_id} has no owner row")))?;
    let members = huddle_db::users::get_profiles(&state.db, &group.members).await?;
    let admins = members
        .iter()
        .filter(|profile| group.is_admin(profile.id))
        .cloned()
        .collect();

    Ok(GroupDetails {
        id: group.id,
        name: group.name,
        owner,
        admins,
        members,
        created_at: group.created_at,
    })
}
