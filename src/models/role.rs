//! Roles and the built-in role codes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

pub const SUPER_ADMIN: &str = "super_admin";
pub const SCHOOL_ADMIN: &str = "school_admin";
pub const FINANCE: &str = "finance";
pub const GUARDIAN: &str = "guardian";

/// Roles seeded by the initial migration; they cannot be deleted.
pub const BUILT_IN_ROLES: [&str; 4] = [SUPER_ADMIN, SCHOOL_ADMIN, FINANCE, GUARDIAN];

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub audit: Audit,
}

impl Role {
    pub fn is_built_in(&self) -> bool {
        BUILT_IN_ROLES.contains(&self.code.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}
