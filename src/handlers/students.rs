//! Student HTTP handlers: CRUD, guardian links, bulk import and the
//! per-student billing list.

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
    models::{
        billing::BillingStudentView,
        student::{
            AttachGuardianRequest, CreateStudentRequest, ImportStudentsRequest, ImportSummary,
            Student, StudentFilter, StudentGuardian, UpdateStudentRequest,
        },
    },
    pagination::{ListQuery, Page},
    services::{billing_service, import_service, student_service},
    state::AppState,
};

pub async fn create_student(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>), AppError> {
    let student = student_service::create_student(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(student)))
}

/// Guardians get only the students linked to them.
pub async fn list_students(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<StudentFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Student>>, AppError> {
    Ok(Json(
        student_service::list_students(&pool, &auth, &filter, &query).await?,
    ))
}

pub async fn get_student(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Student>, AppError> {
    Ok(Json(student_service::get_student(&pool, &auth, id).await?))
}

pub async fn update_student(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateStudentRequest>,
) -> Result<Json<Student>, AppError> {
    Ok(Json(
        student_service::update_student(&pool, &auth, id, request).await?,
    ))
}

/// Refused with 409 once any of the student's installments is pending or paid.
pub async fn delete_student(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    student_service::delete_student(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_guardians(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<StudentGuardian>>, AppError> {
    Ok(Json(student_service::list_guardians(&pool, &auth, id).await?))
}

pub async fn attach_guardian(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<AttachGuardianRequest>,
) -> Result<(StatusCode, Json<Vec<StudentGuardian>>), AppError> {
    let guardians = student_service::attach_guardian(&pool, &auth, id, request).await?;
    Ok((StatusCode::CREATED, Json(guardians)))
}

pub async fn detach_guardian(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    student_service::detach_guardian(&pool, &auth, id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Bulk import students and their guardians.
///
/// # Request Body
///
/// ```json
/// {
///   "school_id": "550e8400-...",
///   "rows": [
///     {
///       "nis": "2025001",
///       "name": "Ani Lestari",
///       "class_name": "1A",
///       "guardian_name": "Budi Lestari",
///       "guardian_email": "budi@example.com",
///       "relation": "father"
///     }
///   ]
/// }
/// ```
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "students_created": 1,
///   "students_updated": 0,
///   "guardians_created": 1,
///   "guardians_linked": 1,
///   "errors": [{ "row": 7, "message": "duplicate NIS '2025001' (first seen in row 1)" }]
/// }
/// ```
///
/// Invalid rows are reported and skipped; the valid rows are written in one
/// database transaction.
pub async fn import_students(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<ImportStudentsRequest>,
) -> Result<Json<ImportSummary>, AppError> {
    Ok(Json(
        import_service::import_students(&state, &auth, request).await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct StudentBillingFilter {
    pub status: Option<String>,
}

pub async fn list_student_billings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Query(filter): Query<StudentBillingFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<BillingStudentView>>, AppError> {
    Ok(Json(
        billing_service::list_student_billings(&pool, &auth, id, filter.status, &query).await?,
    ))
}
