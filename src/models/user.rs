//! User accounts, login and email verification types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::audit::Audit;

/// Represents a user record from the database.
///
/// # Tenancy
///
/// `school_id` is NULL only for super admins. Everyone else is confined
/// to their school by the auth middleware.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub school_id: Option<Uuid>,
    pub role_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,

    /// Argon2 PHC string; never serialized
    pub password_hash: String,

    pub email_verified_at: Option<DateTime<Utc>>,
    pub is_active: bool,

    #[sqlx(flatten)]
    pub audit: Audit,
}

/// A user joined with its role code, as most reads need both.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserWithRole {
    #[sqlx(flatten)]
    pub user: User,
    pub role_code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub school_id: Option<Uuid>,
    pub role_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub role_id: Option<Uuid>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub is_active: Option<bool>,
}

/// Response body for user endpoints (no password hash).
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub school_id: Option<Uuid>,
    pub role_id: Uuid,
    pub role_code: String,
    pub username: String,
    pub email: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,
    pub email_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserWithRole> for UserResponse {
    fn from(row: UserWithRole) -> Self {
        let user = row.user;
        Self {
            id: user.id,
            school_id: user.school_id,
            role_id: user.role_id,
            role_code: row.role_code,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            phone: user.phone,
            email_verified: user.email_verified_at.is_some(),
            is_active: user.is_active,
            created_at: user.audit.created_at,
            updated_at: user.audit.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct VerifyEmailQuery {
    pub token: String,
}

/// A verification link waiting to be inserted.
///
/// Only the SHA-256 of the token is stored; the plain token goes out by email.
#[derive(Debug, Clone)]
pub struct NewEmailVerification {
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}
