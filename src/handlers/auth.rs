//! Authentication HTTP handlers.
//!
//! - POST /api/v1/auth/login - Exchange username and password for a bearer token
//! - GET /api/v1/auth/verify?token= - Confirm an email address
//! - GET /api/v1/auth/me - Current user

use axum::{
    Extension, Json,
    extract::{Query, State},
};
use serde_json::{Value, json};

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::user::{LoginRequest, LoginResponse, UserResponse, VerifyEmailQuery},
    services::{auth_service, user_service},
    state::AppState,
};

/// Log in.
///
/// # Request Body
///
/// ```json
/// { "username": "admin", "password": "s3cret-pass" }
/// ```
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "access_token": "eyJhbGciOi...",
///   "token_type": "Bearer",
///   "expires_at": "2025-07-10T22:00:00Z",
///   "user": { "id": "...", "username": "admin", "role": "super_admin" }
/// }
/// ```
///
/// Wrong credentials and inactive users both answer 401.
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = auth_service::login(&state.pool, &state.config, request).await?;
    Ok(Json(response))
}

/// Follow a verification link. Unknown, used and expired tokens answer 400.
pub async fn verify_email(
    State(pool): State<DbPool>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<Value>, AppError> {
    auth_service::verify_email(&pool, &query.token).await?;
    Ok(Json(json!({ "verified": true })))
}

pub async fn me(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UserResponse>, AppError> {
    Ok(Json(user_service::me(&pool, &auth).await?))
}
