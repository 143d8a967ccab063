//! Audit and soft-delete columns shared by every entity.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// The audit block every table carries.
///
/// Embedded into entity structs with `#[sqlx(flatten)]` so a `SELECT *`
/// row maps straight into the outer struct. Rows with `deleted_at` set are
/// soft-deleted and never returned by reads.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Audit {
    pub created_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
    #[serde(skip)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub deleted_by: Option<Uuid>,
}

impl Audit {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[cfg(test)]
impl Audit {
    pub fn fresh(actor: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            created_by: actor,
            updated_at: now,
            updated_by: actor,
            deleted_at: None,
            deleted_by: None,
        }
    }
}
