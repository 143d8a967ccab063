//! Role HTTP handlers. Any authenticated user may read roles; writes are
//! for super admins.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::role::{CreateRoleRequest, Role, UpdateRoleRequest},
    pagination::{ListQuery, Page},
    services::role_service,
};

pub async fn create_role(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    let role = role_service::create_role(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

pub async fn list_roles(
    State(pool): State<DbPool>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Role>>, AppError> {
    Ok(Json(role_service::list_roles(&pool, &query).await?))
}

pub async fn get_role(
    State(pool): State<DbPool>,
    Path(id): Path<Uuid>,
) -> Result<Json<Role>, AppError> {
    Ok(Json(role_service::get_role(&pool, id).await?))
}

pub async fn update_role(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<Json<Role>, AppError> {
    Ok(Json(role_service::update_role(&pool, &auth, id, request).await?))
}

/// Built-in roles and roles still assigned to users are refused with 409.
pub async fn delete_role(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    role_service::delete_role(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
