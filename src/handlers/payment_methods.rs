//! Payment method HTTP handlers.
//!
//! Bank codes are checked against the bank master data, so the create and
//! update handlers need the master data directory from the config.

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
    models::payment_method::{
        CreatePaymentMethodRequest, PaymentMethod, UpdatePaymentMethodRequest,
    },
    pagination::{ListQuery, Page},
    services::payment_method_service,
    state::AppState,
};

/// Create a payment method.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "BCA Virtual Account",
///   "channel": "bank_transfer",
///   "bank_code": "BCA",
///   "admin_fee": 4000
/// }
/// ```
pub async fn create_payment_method(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreatePaymentMethodRequest>,
) -> Result<(StatusCode, Json<PaymentMethod>), AppError> {
    let method = payment_method_service::create_payment_method(
        &state.pool,
        &state.config.master_data_dir,
        &auth,
        request,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(method)))
}

pub async fn list_payment_methods(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<SchoolFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<PaymentMethod>>, AppError> {
    Ok(Json(
        payment_method_service::list_payment_methods(&pool, &auth, filter.school_id, &query)
            .await?,
    ))
}

pub async fn get_payment_method(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentMethod>, AppError> {
    Ok(Json(
        payment_method_service::get_payment_method(&pool, &auth, id).await?,
    ))
}

pub async fn update_payment_method(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePaymentMethodRequest>,
) -> Result<Json<PaymentMethod>, AppError> {
    let method = payment_method_service::update_payment_method(
        &state.pool,
        &state.config.master_data_dir,
        &auth,
        id,
        request,
    )
    .await?;
    Ok(Json(method))
}

pub async fn delete_payment_method(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    payment_method_service::delete_payment_method(&pool, &auth, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
