use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    handlers::academics::SchoolFilter,
    middleware::auth::AuthContext,
    models::billing_type::{BillingType, CreateBillingTypeRequest, UpdateBillingTypeRequest},
    pagination::{ListQuery, Page},
    services::billing_type_service,
};

pub async fn create_billing_type(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateBillingTypeRequest>,
) -> Result<(StatusCode, Json<BillingType>), AppError> {
    let billing_type = billing_type_service::create_billing_type(&pool, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(billing_type)))
}

pub async fn list_billing_types(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<SchoolFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<BillingType>>, AppError> {
    Ok(Json(
        billing_type_service::list_billing_types(&pool, &auth, filter.school_id, &query).await?,
    ))
}

pub async fn get_billing_type(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<BillingType>, AppError> {
    Ok(Json(billing_type_service::get_billing_type(&pool, &auth, id).await?))
}

pub async fn update_billing_type(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBillingTypeRequest>,
) -> Result<Json<BillingType>, AppError> {
    Ok(Json(
        billing_type_service::update_billing_type(&pool, &auth, id, request).await?,
    ))
}

pub async fn delete_billing_type(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    billing_type_service::delete_billing_type(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
