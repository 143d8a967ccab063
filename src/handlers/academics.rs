//! School year, grade and class HTTP handlers.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::academic::{
        ClassFilter, CreateSchoolClassRequest, CreateSchoolGradeRequest, CreateSchoolYearRequest,
        SchoolClass, SchoolGrade, SchoolYear, UpdateSchoolClassRequest, UpdateSchoolGradeRequest,
        UpdateSchoolYearRequest,
    },
    pagination::{ListQuery, Page},
    services::academic_service,
};

/// `?school_id=` filter shared by year and grade lists.
#[derive(Debug, Default, Deserialize)]
pub struct SchoolFilter {
    pub school_id: Option<Uuid>,
}

/// Creating an active year deactivates the school's other years.
pub async fn create_school_year(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateSchoolYearRequest>,
) -> Result<(StatusCode, Json<SchoolYear>), AppError> {
    let year = academic_service::create_school_year(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(year)))
}

pub async fn list_school_years(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<SchoolFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<SchoolYear>>, AppError> {
    let page = academic_service::list_school_years(&pool, &auth, filter.school_id, &query).await?;
    Ok(Json(page))
}

pub async fn get_school_year(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SchoolYear>, AppError> {
    Ok(Json(academic_service::get_school_year(&pool, &auth, id).await?))
}

pub async fn update_school_year(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSchoolYearRequest>,
) -> Result<Json<SchoolYear>, AppError> {
    Ok(Json(
        academic_service::update_school_year(&pool, &auth, id, request).await?,
    ))
}

pub async fn delete_school_year(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    academic_service::delete_school_year(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_school_grade(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateSchoolGradeRequest>,
) -> Result<(StatusCode, Json<SchoolGrade>), AppError> {
    let grade = academic_service::create_school_grade(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(grade)))
}

pub async fn list_school_grades(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<SchoolFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<SchoolGrade>>, AppError> {
    let page = academic_service::list_school_grades(&pool, &auth, filter.school_id, &query).await?;
    Ok(Json(page))
}

pub async fn get_school_grade(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SchoolGrade>, AppError> {
    Ok(Json(academic_service::get_school_grade(&pool, &auth, id).await?))
}

pub async fn update_school_grade(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSchoolGradeRequest>,
) -> Result<Json<SchoolGrade>, AppError> {
    Ok(Json(
        academic_service::update_school_grade(&pool, &auth, id, request).await?,
    ))
}

pub async fn delete_school_grade(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    academic_service::delete_school_grade(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The grade and year must belong to the same school as the class.
pub async fn create_school_class(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateSchoolClassRequest>,
) -> Result<(StatusCode, Json<SchoolClass>), AppError> {
    let class = academic_service::create_school_class(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(class)))
}

pub async fn list_school_classes(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<ClassFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<SchoolClass>>, AppError> {
    Ok(Json(
        academic_service::list_school_classes(&pool, &auth, &filter, &query).await?,
    ))
}

pub async fn get_school_class(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SchoolClass>, AppError> {
    Ok(Json(academic_service::get_school_class(&pool, &auth, id).await?))
}

pub async fn update_school_class(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateSchoolClassRequest>,
) -> Result<Json<SchoolClass>, AppError> {
    Ok(Json(
        academic_service::update_school_class(&pool, &auth, id, request).await?,
    ))
}

pub async fn delete_school_class(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    academic_service::delete_school_class(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
