//! User HTTP handlers.
//!
//! - POST /api/v1/users - Create user (sends a verification email when an address is given)
//! - GET /api/v1/users - List users
//! - GET /api/v1/users/{id} - Get user
//! - PUT /api/v1/users/{id} - Update user
//! - DELETE /api/v1/users/{id} - Soft delete user
//! - POST /api/v1/users/{id}/resend-verification - Issue a new verification link

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
    models::user::{CreateUserRequest, UpdateUserRequest, UserResponse},
    pagination::{ListQuery, Page},
    services::user_service::{self, UserFilter},
    state::AppState,
};

/// Create a user.
///
/// # Request Body
///
/// ```json
/// {
///   "school_id": "550e8400-...",
///   "role_id": "660e8400-...",
///   "username": "siti.finance",
///   "email": "siti@sdn01.sch.id",
///   "full_name": "Siti Rahma",
///   "password": "a-long-password"
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the user, without password hash
/// - **409**: username or email already taken
/// - **403**: creating a super admin without being one
pub async fn create_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = user_service::create_user(&state, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn list_users(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<UserFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<UserResponse>>, AppError> {
    Ok(Json(user_service::list_users(&pool, &auth, &filter, &query).await?))
}

pub async fn get_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_service::get_user(&pool, &auth, id).await?))
}

/// Changing the email resets verification and sends a new link.
pub async fn update_user(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_service::update_user(&state, &auth, id, request).await?))
}

pub async fn delete_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user_service::delete_user(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn resend_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    user_service::resend_verification(&state, &auth, id).await?;
    Ok(StatusCode::ACCEPTED)
}
