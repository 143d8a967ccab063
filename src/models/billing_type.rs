use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// Category of billing (tuition, building fee, donation, ...), per school.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct BillingType {
    pub id: Uuid,
    pub school_id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct CreateBillingTypeRequest {
    pub school_id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBillingTypeRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}
