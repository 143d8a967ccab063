//! Student, guardian link and bulk import models.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// Represents a student record from the database.
///
/// NIS (student registration number) is unique within a school.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Student {
    pub id: Uuid,
    pub school_id: Uuid,
    pub school_class_id: Option<Uuid>,
    pub nis: String,
    pub name: String,
    /// "L" or "P"
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub is_active: bool,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    pub school_id: Option<Uuid>,
    pub school_class_id: Option<Uuid>,
    pub nis: String,
    pub name: String,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStudentRequest {
    pub school_class_id: Option<Uuid>,
    pub name: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StudentFilter {
    pub school_id: Option<Uuid>,
    pub school_class_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

/// Guardian linked to a student, with the guardian's contact details.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StudentGuardian {
    pub id: Uuid,
    pub student_id: Uuid,
    pub user_id: Uuid,
    pub relation: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachGuardianRequest {
    pub user_id: Uuid,
    #[serde(default = "default_relation")]
    pub relation: String,
}

pub fn default_relation() -> String {
    "guardian".to_string()
}

/// One row of a bulk import.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportStudentRow {
    pub nis: String,
    pub name: String,
    pub class_name: Option<String>,
    pub gender: Option<String>,
    pub guardian_name: Option<String>,
    pub guardian_email: Option<String>,
    pub guardian_phone: Option<String>,
    pub relation: Option<String>,
}

/// Request body for `POST /api/v1/students/import`.
#[derive(Debug, Deserialize)]
pub struct ImportStudentsRequest {
    pub school_id: Option<Uuid>,
    /// Classes named in rows are looked up in this year
    pub school_year_id: Option<Uuid>,
    pub rows: Vec<ImportStudentRow>,
}

/// A rejected import row. `row` is 1-based, matching spreadsheet numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRowError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub students_created: usize,
    pub students_updated: usize,
    pub guardians_created: usize,
    pub guardians_linked: usize,
    pub errors: Vec<ImportRowError>,
}
