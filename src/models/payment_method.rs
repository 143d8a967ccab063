//! Payment methods a school accepts.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// Represents a payment method record from the database.
///
/// `channel` is the gateway payment type (`bank_transfer`, `qris`,
/// `echannel`, ...). For bank transfers `bank_code` names an entry of the
/// bank master data and `account_number` is unique across the system.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub channel: String,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,

    /// Flat fee added on top of the billed amount
    pub admin_fee: i64,

    pub is_active: bool,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentMethodRequest {
    pub school_id: Option<Uuid>,
    pub name: String,
    pub channel: String,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    #[serde(default)]
    pub admin_fee: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentMethodRequest {
    pub name: Option<String>,
    pub bank_code: Option<String>,
    pub account_number: Option<String>,
    pub account_name: Option<String>,
    pub admin_fee: Option<i64>,
    pub is_active: Option<bool>,
}
