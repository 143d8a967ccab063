//! Billing HTTP handlers.
//!
//! - POST /api/v1/billings - Create billing with its installments
//! - GET /api/v1/billings - List billings
//! - GET /api/v1/billings/{id} - Get billing with installments
//! - PUT /api/v1/billings/{id} - Update header fields
//! - DELETE /api/v1/billings/{id} - Soft delete (refused once anything is paid or pending)
//! - POST /api/v1/billings/{id}/generate - Fan installments out to students
//! - GET /api/v1/billing-students - Per-student installments

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
    models::billing::{
        Billing, BillingFilter, BillingStudentFilter, BillingStudentView, BillingWithDetails,
        CreateBillingRequest, GenerateBillingRequest, GenerateBillingResponse,
        UpdateBillingRequest,
    },
    pagination::{ListQuery, Page},
    services::billing_service,
};

/// Create a billing.
///
/// # Request Body
///
/// ```json
/// {
///   "billing_type_id": "550e8400-...",
///   "school_year_id": "660e8400-...",
///   "school_grade_id": "770e8400-...",
///   "code": "SPP-2025",
///   "name": "SPP 2025/2026",
///   "details": [
///     { "name": "July", "amount": 350000, "due_date": "2025-07-10" },
///     { "name": "August", "amount": 350000, "due_date": "2025-08-10" }
///   ]
/// }
/// ```
///
/// # Response (201 Created)
///
/// The billing with `billing_number` (`BILL/SDN01/2025/00001`) and its
/// details numbered 1..n in the given order.
pub async fn create_billing(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateBillingRequest>,
) -> Result<(StatusCode, Json<BillingWithDetails>), AppError> {
    let billing = billing_service::create_billing(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(billing)))
}

pub async fn list_billings(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<BillingFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Billing>>, AppError> {
    Ok(Json(
        billing_service::list_billings(&pool, &auth, &filter, &query).await?,
    ))
}

pub async fn get_billing(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<BillingWithDetails>, AppError> {
    Ok(Json(billing_service::get_billing(&pool, &auth, id).await?))
}

pub async fn update_billing(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBillingRequest>,
) -> Result<Json<BillingWithDetails>, AppError> {
    Ok(Json(
        billing_service::update_billing(&pool, &auth, id, request).await?,
    ))
}

pub async fn delete_billing(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    billing_service::delete_billing(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Generate per-student installments.
///
/// # Request Body (optional)
///
/// ```json
/// { "student_ids": ["880e8400-..."] }
/// ```
///
/// Without `student_ids` the targets are the active students of the
/// billing's class, else its grade, else the whole school. Pairs that
/// already have an installment are skipped, so generating twice is safe.
///
/// # Response (200 OK)
///
/// ```json
/// { "students": 30, "created": 60, "skipped": 0 }
/// ```
pub async fn generate_billing(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<GenerateBillingRequest>>,
) -> Result<Json<GenerateBillingResponse>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        billing_service::generate_billing(&pool, &auth, id, request).await?,
    ))
}

pub async fn list_billing_students(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<BillingStudentFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<BillingStudentView>>, AppError> {
    Ok(Json(
        billing_service::list_billing_students(&pool, &auth, &filter, &query).await?,
    ))
}
