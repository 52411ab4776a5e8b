use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use huddle_core::group;
use huddle_core::AppState;
use huddle_models::group::{Group, GroupDetails};
use serde::Deserialize;

use super::parse_id;
use crate::error::ApiError;
use crate::middleware::{AuthUser, JsonBody};
use crate::response::ApiResponse;

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub name: Option<String>,
}

fn group_and_user(ids: &(String, String)) -> Result<(i64, i64), ApiError> {
    Ok((parse_id(&ids.0, "group")?, parse_id(&ids.1, "user")?))
}

pub async fn create_group(
    State(state): State<AppState>,
    auth: AuthUser,
    JsonBody(body): JsonBody<CreateGroupRequest>,
) -> Result<ApiResponse<Group>, ApiError> {
    let row = group::create_group(&state, auth.id(), body.name.as_deref()).await?;
    Ok(ApiResponse::with_status(
        StatusCode::CREATED,
        row.to_group(),
        "Group created successfully",
    ))
}

pub async fn group_details(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<String>,
) -> Result<ApiResponse<GroupDetails>, ApiError> {
    let group_id = parse_id(&group_id, "group")?;
    let details = group::group_details(&state, auth.id(), group_id).await?;
    Ok(ApiResponse::ok(details, "Group details"))
}

pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ids): Path<(String, String)>,
) -> Result<ApiResponse<Group>, ApiError> {
    let (group_id, member_id) = group_and_user(&ids)?;
    let row = group::add_member(&state, auth.id(), group_id, member_id).await?;
    Ok(ApiResponse::ok(row.to_group(), "Member added"))
}

pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ids): Path<(String, String)>,
) -> Result<ApiResponse<Group>, ApiError> {
    let (group_id, member_id) = group_and_user(&ids)?;
    let row = group::remove_member(&state, auth.id(), group_id, member_id).await?;
    Ok(ApiResponse::ok(row.to_group(), "Member removed"))
}

pub async fn promote_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ids): Path<(String, String)>,
) -> Result<ApiResponse<Group>, ApiError> {
    let (group_id, member_id) = group_and_user(&ids)?;
    let row = group::promote_admin(&state, auth.id(), group_id, member_id).await?;
    Ok(ApiResponse::ok(row.to_group(), "Member promoted to admin"))
}

pub async fn demote_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ids): Path<(String, String)>,
) -> Result<ApiResponse<Group>, ApiError> {
    let (group_id, member_id) = group_and_user(&ids)?;
    let row = group::demote_admin(&state, auth.id(), group_id, member_id).await?;
    Ok(ApiResponse::ok(row.to_group(), "Admin demoted"))
}

pub async fn remove_admin(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(ids): Path<(String, String)>,
) -> Result<ApiResponse<Group>, ApiError> {
    let (group_id, admin_id) = group_and_user(&ids)?;
    let row = group::remove_admin(&state, auth.id(), group_id, admin_id).await?;
    Ok(ApiResponse::ok(row.to_group(), "Admin removed from group"))
}

pub async fn delete_group(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(group_id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    let group_id = parse_id(&group_id, "group")?;
    group::delete_group(&state, auth.id(), group_id).await?;
    Ok(ApiResponse::ok((), "Group deleted"))
}
