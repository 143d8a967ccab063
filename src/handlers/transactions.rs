//! Payment transaction HTTP handlers.
//!
//! This module implements the payment endpoints:
//! - POST /api/v1/transactions - Pay one or more installments
//! - GET /api/v1/transactions - List transactions
//! - GET /api/v1/transactions/{id} - Get transaction with items
//! - POST /api/v1/transactions/{id}/sync - Pull the status from the gateway

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
    models::transaction::{
        CreateTransactionRequest, TransactionBilling, TransactionFilter, TransactionResponse,
    },
    pagination::{ListQuery, Page},
    services::payment_service,
    state::AppState,
};

/// Create a payment transaction.
///
/// # Request Body
///
/// ```json
/// {
///   "student_id": "550e8400-...",
///   "payment_method_id": "660e8400-...",
///   "billing_student_ids": ["770e8400-...", "880e8400-..."]
/// }
/// ```
///
/// # Response (201 Created)
///
/// ```json
/// {
///   "id": "990e8400-...",
///   "invoice_number": "INV/SDN01/20250710/00001",
///   "amount": 700000,
///   "admin_fee": 4000,
///   "total_amount": 704000,
///   "status": "pending",
///   "payment_token": "66e4fa55-...",
///   "redirect_url": "https://app.gateway.example/snap/v4/redirection/66e4fa55-...",
///   "items": [...]
/// }
/// ```
///
/// # Errors
///
/// - **400**: empty or duplicate items, items of another student, inactive method
/// - **409**: an item is already pending or paid
/// - **502**: the gateway refused the charge; nothing is stored
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let response = payment_service::create_transaction(&state, &auth, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_transactions(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<TransactionFilter>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<TransactionBilling>>, AppError> {
    Ok(Json(
        payment_service::list_transactions(&pool, &auth, &filter, &query).await?,
    ))
}

pub async fn get_transaction(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    Ok(Json(payment_service::get_transaction(&pool, &auth, id).await?))
}

/// Ask the gateway for the current status and apply it, for when a
/// notification never arrived. Returns the transaction after reconciliation.
pub async fn sync_transaction(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, AppError> {
    Ok(Json(
        payment_service::sync_transaction(&state, &auth, id).await?,
    ))
}
