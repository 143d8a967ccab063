//! Payment transaction models and API request/response types.
//!
//! This module defines:
//! - `TransactionBilling`: a payment attempt against one or more billing students
//! - `TransactionStatus`: its lifecycle
//! - `GatewayNotification`: the webhook body the payment gateway posts

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// Represents a payment transaction record from the database.
///
/// # Database Table
///
/// Maps to the `transaction_billings` table. Each transaction:
/// - Belongs to one student of one school
/// - Covers one or more `billing_students` rows (via `transaction_billing_items`)
/// - Stores amounts in rupiah as `i64` (never floats)
/// - Is reconciled with the gateway by `invoice_number` (the gateway's order id)
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionBilling {
    pub id: Uuid,
    pub school_id: Uuid,
    pub student_id: Uuid,
    pub payment_method_id: Uuid,

    /// `INV/<school>/<yyyymmdd>/<seq>`, sent to the gateway as the order id
    pub invoice_number: String,

    /// Sum of the covered billing students
    pub amount: i64,

    /// Fee of the payment method at creation time
    pub admin_fee: i64,

    /// `amount + admin_fee`, what the gateway charges
    pub total_amount: i64,

    /// One of [`TransactionStatus`], stored as text
    pub status: String,

    pub gateway_transaction_id: Option<String>,
    pub payment_token: Option<String>,
    pub redirect_url: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,

    /// Last raw gateway notification/status body
    pub gateway_payload: Option<serde_json::Value>,

    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

impl TransactionBilling {
    pub fn status(&self) -> TransactionStatus {
        self.status.parse().unwrap_or(TransactionStatus::Pending)
    }
}

/// Lifecycle of a transaction. Only `Pending` may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Expired => "expired",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "paid" => Ok(TransactionStatus::Paid),
            "failed" => Ok(TransactionStatus::Failed),
            "expired" => Ok(TransactionStatus::Expired),
            other => Err(format!("unknown transaction status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransactionItem {
    pub billing_student_id: Uuid,
    pub amount: i64,
    pub billing_name: String,
    pub detail_name: String,
}

/// Request to pay billing students.
///
/// # JSON Example
///
/// ```json
/// {
///   "student_id": "550e8400-e29b-41d4-a716-446655440000",
///   "payment_method_id": "660e8400-e29b-41d4-a716-446655440001",
///   "billing_student_ids": ["770e8400-e29b-41d4-a716-446655440002"]
/// }
/// ```
///
/// # Validation
///
/// - At least one billing student, no duplicates
/// - Every billing student belongs to the student and is unpaid
/// - Payment method is active and belongs to the student's school
#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub student_id: Uuid,
    pub payment_method_id: Uuid,
    pub billing_student_ids: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionFilter {
    pub school_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub status: Option<String>,
}

/// Transaction with its items, returned by create/get.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    #[serde(flatten)]
    pub transaction: TransactionBilling,
    pub items: Vec<TransactionItem>,
}

/// Status notification posted by the payment gateway.
///
/// # Example
///
/// ```json
/// {
///   "order_id": "INV/SDN01/20250710/00001",
///   "status_code": "200",
///   "gross_amount": "355000.00",
///   "signature_key": "…",
///   "transaction_status": "settlement",
///   "transaction_id": "b1f…",
///   "payment_type": "bank_transfer"
/// }
/// ```
///
/// The same shape is returned by the gateway's status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayNotification {
    pub order_id: String,
    pub status_code: String,
    pub gross_amount: String,
    #[serde(default)]
    pub signature_key: String,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_type: Option<String>,
    pub settlement_time: Option<String>,
}

/// Outcome of applying a notification, returned to the webhook caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The transaction moved to a new status
    Updated(TransactionStatus),
    /// Same status as stored, or a final transaction; nothing changed
    Unchanged(TransactionStatus),
}
