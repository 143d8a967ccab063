//! School (tenant) model and API request types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// Represents a school record from the database.
///
/// # Database Table
///
/// Maps to the `schools` table. Every other school-scoped row references
/// a school through `school_id`; a school is the tenant boundary.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct School {
    pub id: Uuid,

    /// Short unique code, used inside billing and invoice numbers
    pub code: String,

    pub name: String,
    pub address: Option<String>,

    /// Ids from the province/city master data files
    pub province_id: Option<String>,
    pub city_id: Option<String>,

    pub phone: Option<String>,
    pub email: Option<String>,

    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

/// Request body for creating a school.
///
/// # JSON Example
///
/// ```json
/// {
///   "code": "SDN01",
///   "name": "SD Negeri 01",
///   "province_id": "31",
///   "city_id": "3171"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateSchoolRequest {
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub province_id: Option<String>,
    pub city_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Partial update; absent fields keep their value.
#[derive(Debug, Deserialize)]
pub struct UpdateSchoolRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub province_id: Option<String>,
    pub city_id: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}
