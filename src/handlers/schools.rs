//! School HTTP handlers.
//!
//! - POST /api/v1/schools - Create school (super admin)
//! - GET /api/v1/schools - List schools
//! - GET /api/v1/schools/{id} - Get school
//! - PUT /api/v1/schools/{id} - Update school
//! - DELETE /api/v1/schools/{id} - Soft delete school (super admin)

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
    models::school::{CreateSchoolRequest, School, UpdateSchoolRequest},
    pagination::{ListQuery, Page},
    services::school_service,
};

pub async fn create_school(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateSchoolRequest>,
) -> Result<(StatusCode, Json<School>), AppError> {
    let school = school_service::create_school(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(school)))
}

/// School-bound users only ever see their own school.
pub async fn list_schools(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<School>>, AppError> {
    Ok(Json(school_service::list_schools(&pool, &auth, &query).await?))
}

pub async fn get_school(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<School>, AppError> {
    Ok(Json(school_service::get_school(&pool, &auth, id).await?))
}

pub async fn update_school(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSchoolRequest>,
) -> Result<Json<School>, AppError> {
    Ok(Json(school_service::update_school(&pool, &auth, id, request).await?))
}

pub async fn delete_school(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    school_service::delete_school(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
