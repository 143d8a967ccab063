//! School years, grades and classes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// An academic year such as "2025/2026". At most one is active per school.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SchoolYear {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchoolYearRequest {
    /// Required for super admins, ignored for school-bound users
    pub school_id: Option<Uuid>,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchoolYearRequest {
    pub name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_active: Option<bool>,
}

/// A grade level (e.g. "Kelas 1", level 1).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SchoolGrade {
    pub id: Uuid,
    pub school_id: Uuid,
    pub name: String,
    pub level: i32,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchoolGradeRequest {
    pub school_id: Option<Uuid>,
    pub name: String,
    pub level: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchoolGradeRequest {
    pub name: Option<String>,
    pub level: Option<i32>,
}

/// A class (rombel) of one grade in one school year.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SchoolClass {
    pub id: Uuid,
    pub school_id: Uuid,
    pub school_grade_id: Uuid,
    pub school_year_id: Uuid,
    pub name: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

#[derive(Debug, Deserialize)]
pub struct CreateSchoolClassRequest {
    pub school_id: Option<Uuid>,
    pub school_grade_id: Uuid,
    pub school_year_id: Uuid,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSchoolClassRequest {
    pub name: Option<String>,
    pub school_grade_id: Option<Uuid>,
}

/// Filters for class lists on top of [`crate::pagination::ListQuery`].
#[derive(Debug, Default, Deserialize)]
pub struct ClassFilter {
    pub school_id: Option<Uuid>,
    pub school_grade_id: Option<Uuid>,
    pub school_year_id: Option<Uuid>,
}
