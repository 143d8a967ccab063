//! Payment gateway webhook.
//!
//! `POST /api/v1/payments/notification` is public: the gateway cannot send
//! a bearer token. Notifications are authenticated by their SHA-512
//! `signature_key` instead.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::{
    error::AppError,
    models::transaction::{GatewayNotification, ReconcileOutcome},
    services::payment_service,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub order_id: String,
    pub outcome: ReconcileOutcome,
}

/// Receive a gateway notification.
///
/// # Request Body
///
/// ```json
/// {
///   "order_id": "INV/SDN01/20250710/00001",
///   "status_code": "200",
///   "gross_amount": "704000.00",
///   "signature_key": "9d4f...",
///   "transaction_status": "settlement",
///   "transaction_id": "b1f1c5c2-...",
///   "payment_type": "bank_transfer"
/// }
/// ```
///
/// # Response
///
/// - **200 OK**: `{"order_id": "...", "outcome": {"updated": "paid"}}`, or
///   `{"unchanged": "paid"}` for a repeated or late notification
/// - **401**: signature mismatch
/// - **400**: gross amount differs from the stored total
/// - **404**: unknown order id
pub async fn payment_notification(
    State(state): State<AppState>,
    Json(notification): Json<GatewayNotification>,
) -> Result<Json<NotificationResponse>, AppError> {
    let order_id = notification.order_id.clone();
    let outcome = payment_service::handle_notification(&state, notification).await?;
    Ok(Json(NotificationResponse { order_id, outcome }))
}
