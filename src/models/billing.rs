//! Billing definitions, their installments and per-student instances.
//!
//! - `Billing`: a payable item defined for a school year, optionally narrowed
//!   to a grade or a class
//! - `BillingDetail`: one installment of a billing (amount + due date)
//! - `BillingStudent`: a detail fanned out to one student; this is what
//!   guardians actually pay

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Billing {
    pub id: Uuid,
    pub school_id: Uuid,
    pub billing_type_id: Uuid,
    pub school_year_id: Uuid,
    pub school_grade_id: Option<Uuid>,
    pub school_class_id: Option<Uuid>,

    /// School-chosen code, unique per school
    pub code: String,

    /// Generated `BILL/<school>/<year>/<seq>` number, unique system-wide
    pub billing_number: String,

    pub name: String,
    pub description: Option<String>,

    /// Donations may carry zero-amount installments
    pub is_donation: bool,

    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillingDetail {
    pub id: Uuid,
    pub billing_id: Uuid,
    pub name: String,
    pub amount: i64,
    pub due_date: NaiveDate,
    /// 1-based installment number
    pub sequence: i32,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

/// Billing with its installments, as returned by `GET /billings/{id}`.
#[derive(Debug, Serialize)]
pub struct BillingWithDetails {
    #[serde(flatten)]
    pub billing: Billing,
    pub details: Vec<BillingDetail>,
    pub total_amount: i64,
}

/// One installment in a create request.
#[derive(Debug, Clone, Deserialize)]
pub struct BillingDetailInput {
    pub name: String,
    pub amount: i64,
    pub due_date: NaiveDate,
}

/// Request body for creating a billing.
///
/// # JSON Example
///
/// ```json
/// {
///   "billing_type_id": "…",
///   "school_year_id": "…",
///   "school_grade_id": "…",
///   "code": "SPP-2025",
///   "name": "SPP 2025/2026",
///   "details": [
///     { "name": "July", "amount": 350000, "due_date": "2025-07-10" },
///     { "name": "August", "amount": 350000, "due_date": "2025-08-10" }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateBillingRequest {
    pub school_id: Option<Uuid>,
    pub billing_type_id: Uuid,
    pub school_year_id: Uuid,
    pub school_grade_id: Option<Uuid>,
    pub school_class_id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_donation: bool,
    pub details: Vec<BillingDetailInput>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBillingRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub billing_type_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingFilter {
    pub school_id: Option<Uuid>,
    pub billing_type_id: Option<Uuid>,
    pub school_year_id: Option<Uuid>,
    pub school_grade_id: Option<Uuid>,
    pub school_class_id: Option<Uuid>,
}

/// Request body for `POST /billings/{id}/generate`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateBillingRequest {
    /// Explicit targets; when absent the billing's class/grade/school decides
    pub student_ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct GenerateBillingResponse {
    pub students: usize,
    pub created: usize,
    pub skipped: usize,
}

/// Lifecycle of a [`BillingStudent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    Unpaid,
    /// Linked to a pending transaction
    Pending,
    Paid,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Unpaid => "unpaid",
            BillingStatus::Pending => "pending",
            BillingStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(BillingStatus::Unpaid),
            "pending" => Ok(BillingStatus::Pending),
            "paid" => Ok(BillingStatus::Paid),
            other => Err(format!("unknown billing status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillingStudent {
    pub id: Uuid,
    pub billing_id: Uuid,
    pub billing_detail_id: Uuid,
    pub student_id: Uuid,
    pub school_id: Uuid,
    pub amount: i64,
    pub due_date: NaiveDate,
    /// One of [`BillingStatus`], stored as text
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_billing_id: Option<Uuid>,
    pub last_reminded_at: Option<DateTime<Utc>>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

/// Billing student joined with the names a guardian wants to see.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillingStudentView {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: BillingStudent,
    pub billing_name: String,
    pub billing_number: String,
    pub detail_name: String,
    pub student_name: String,
    pub student_nis: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingStudentFilter {
    pub school_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub billing_id: Option<Uuid>,
    pub status: Option<String>,
    pub due_before: Option<NaiveDate>,
}

/// A BillingStudent row planned by the fan-out, not yet inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBillingStudent {
    pub billing_detail_id: Uuid,
    pub student_id: Uuid,
    pub amount: i64,
    pub due_date: NaiveDate,
}

/// One row of `GET /reports/billing-summary`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillingSummaryRow {
    pub billing_id: Uuid,
    pub billing_number: String,
    pub billing_name: String,
    pub total_items: i64,
    pub total_amount: i64,
    pub paid_items: i64,
    pub paid_amount: i64,
    pub pending_amount: i64,
    pub outstanding_amount: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct BillingSummaryQuery {
    pub school_id: Option<Uuid>,
    pub school_year_id: Option<Uuid>,
    pub billing_id: Option<Uuid>,
}
