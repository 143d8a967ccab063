//! User management.
//!
//! Usernames and emails are unique across the system. Passwords are stored as
//! argon2 hashes. Creating a user with an email sends a verification link.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::role::{self, Role};
use crate::models::user::{CreateUserRequest, UpdateUserRequest, UserResponse, UserWithRole};
use crate::pagination::{ListQuery, Page};
use crate::services::auth_service::{self, VerificationTarget};
use crate::services::validation::{normalize_email, normalize_phone, optional_trimmed, required};
use crate::state::AppState;

const SORTABLE: &[&str] = &["username", "full_name", "created_at"];

const SELECT_WITH_ROLE: &str =
    "SELECT u.*, r.code AS role_code FROM users u JOIN roles r ON r.id = u.role_id";

pub async fn role_id_by_code(pool: &DbPool, code: &str) -> Result<Uuid, AppError> {
    sqlx::query_scalar("SELECT id FROM roles WHERE code = $1 AND deleted_at IS NULL")
        .bind(code)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Role"))
}

pub fn validate_username(raw: &str) -> Result<String, AppError> {
    let username = required(raw, "username")?.to_ascii_lowercase();
    if !(3..=64).contains(&username.len())
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@'))
    {
        return Err(AppError::invalid(
            "username must be 3-64 characters of letters, digits, '.', '_', '-' or '@'",
        ));
    }
    Ok(username)
}

pub async fn username_taken(pool: &DbPool, username: &str) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND deleted_at IS NULL)",
    )
    .bind(username)
    .fetch_one(pool)
    .await?)
}

async fn email_taken(pool: &DbPool, email: &str, except: Option<Uuid>) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM users
            WHERE LOWER(email) = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR id <> $2)
        )
        "#,
    )
    .bind(email)
    .bind(except)
    .fetch_one(pool)
    .await?)
}

/// Decide which school a new user belongs to, given the role being assigned.
fn resolve_user_school(
    auth: &AuthContext,
    role_code: &str,
    requested: Option<Uuid>,
) -> Result<Option<Uuid>, AppError> {
    if role_code == role::SUPER_ADMIN {
        auth.require_super_admin()?;
        if requested.is_some() {
            return Err(AppError::invalid("Super admins do not belong to a school"));
        }
        return Ok(None);
    }
    auth.school_scope(requested).map(Some)
}

pub async fn create_user(
    state: &AppState,
    auth: &AuthContext,
    request: CreateUserRequest,
) -> Result<UserResponse, AppError> {
    auth.require_admin()?;
    let pool = &state.pool;

    let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1 AND deleted_at IS NULL")
        .bind(request.role_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Role"))?;
    let school_id = resolve_user_school(auth, &role.code, request.school_id)?;

    let username = validate_username(&request.username)?;
    let full_name = required(&request.full_name, "full_name")?;
    let email = optional_trimmed(request.email)
        .map(|e| normalize_email(&e))
        .transpose()?;
    let phone = optional_trimmed(request.phone)
        .map(|p| normalize_phone(&p))
        .transpose()?;
    auth_service::validate_password(&request.password)?;

    if username_taken(pool, &username).await? {
        return Err(AppError::conflict(format!("Username '{username}' is already used")));
    }
    if let Some(email) = &email {
        if email_taken(pool, email, None).await? {
            return Err(AppError::conflict(format!("Email '{email}' is already used")));
        }
    }

    let password_hash = auth_service::hash_password(&request.password)?;
    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (school_id, role_id, username, email, full_name, phone, password_hash, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING id
        "#,
    )
    .bind(school_id)
    .bind(role.id)
    .bind(&username)
    .bind(&email)
    .bind(&full_name)
    .bind(&phone)
    .bind(&password_hash)
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;

    if let Some(email) = email {
        auth_service::issue_verifications(
            pool,
            &state.config,
            &state.email,
            vec![VerificationTarget {
                user_id,
                email,
                full_name: full_name.clone(),
            }],
        )
        .await?;
    }

    tracing::info!(%user_id, %username, role = %role.code, "user created");
    get_user(pool, auth, user_id).await
}

async fn find_user(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<UserWithRole, AppError> {
    let sql = format!(
        "{SELECT_WITH_ROLE} WHERE u.id = $1 AND u.deleted_at IS NULL \
         AND ($2::uuid IS NULL OR u.school_id = $2)"
    );
    sqlx::query_as::<_, UserWithRole>(&sql)
        .bind(id)
        .bind(auth.school_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("User"))
}

pub async fn get_user(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<UserResponse, AppError> {
    if id != auth.user_id {
        auth.require_staff()?;
    }
    Ok(find_user(pool, auth, id).await?.into())
}

/// The caller's own profile.
pub async fn me(pool: &DbPool, auth: &AuthContext) -> Result<UserResponse, AppError> {
    get_user(pool, auth, auth.user_id).await
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct UserFilter {
    pub school_id: Option<Uuid>,
    pub role: Option<String>,
}

pub async fn list_users(
    pool: &DbPool,
    auth: &AuthContext,
    filter: &UserFilter,
    query: &ListQuery,
) -> Result<Page<UserResponse>, AppError> {
    auth.require_staff()?;
    let school_id = auth.school_filter(filter.school_id);
    let search = query.search_pattern();

    let mut count =
        QueryBuilder::new("SELECT COUNT(*) FROM users u JOIN roles r ON r.id = u.role_id");
    push_filters(&mut count, school_id, filter.role.clone(), search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(SELECT_WITH_ROLE);
    push_filters(&mut select, school_id, filter.role.clone(), search);
    let (limit, offset) = query.limit_offset();
    select
        .push(" ORDER BY u.")
        .push(query.order_by(SORTABLE, "created_at"))
        .push(" LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let users = select.build_query_as::<UserWithRole>().fetch_all(pool).await?;

    Ok(Page::new(users, query, total).map(UserResponse::from))
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    role_code: Option<String>,
    search: Option<String>,
) {
    builder.push(" WHERE u.deleted_at IS NULL");
    if let Some(id) = school_id {
        builder.push(" AND u.school_id = ").push_bind(id);
    }
    if let Some(code) = role_code {
        builder.push(" AND r.code = ").push_bind(code);
    }
    if let Some(pattern) = search {
        builder
            .push(" AND (u.username ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.full_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR u.email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_user(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateUserRequest,
) -> Result<UserResponse, AppError> {
    let pool = &state.pool;
    let editing_self = id == auth.user_id;
    if !editing_self {
        auth.require_admin()?;
    }
    // Role and activation changes always need an admin, even on oneself
    if request.role_id.is_some() || request.is_active.is_some() {
        auth.require_admin()?;
    }
    let current = find_user(pool, auth, id).await?;

    if let Some(role_id) = request.role_id {
        let code: String =
            sqlx::query_scalar("SELECT code FROM roles WHERE id = $1 AND deleted_at IS NULL")
                .bind(role_id)
                .fetch_optional(pool)
                .await?
                .ok_or(AppError::NotFound("Role"))?;
        if (code == role::SUPER_ADMIN) != current.user.school_id.is_none() {
            return Err(AppError::invalid(
                "Only users without a school can hold the super_admin role",
            ));
        }
    }

    let email = optional_trimmed(request.email)
        .map(|e| normalize_email(&e))
        .transpose()?;
    let email_changed = email.is_some() && email != current.user.email;
    if let Some(email) = email.as_deref().filter(|_| email_changed) {
        if email_taken(pool, email, Some(id)).await? {
            return Err(AppError::conflict(format!("Email '{email}' is already used")));
        }
    }
    let phone = optional_trimmed(request.phone)
        .map(|p| normalize_phone(&p))
        .transpose()?;
    let full_name = request
        .full_name
        .as_deref()
        .map(|n| required(n, "full_name"))
        .transpose()?;
    let password_hash = match request.password.as_deref() {
        Some(password) => {
            auth_service::validate_password(password)?;
            Some(auth_service::hash_password(password)?)
        }
        None => None,
    };

    sqlx::query(
        r#"
        UPDATE users
        SET role_id = COALESCE($2, role_id),
            email = COALESCE($3, email),
            email_verified_at = CASE WHEN $4 THEN NULL ELSE email_verified_at END,
            full_name = COALESCE($5, full_name),
            phone = COALESCE($6, phone),
            password_hash = COALESCE($7, password_hash),
            is_active = COALESCE($8, is_active),
            updated_by = $9,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(request.role_id)
    .bind(&email)
    .bind(email_changed)
    .bind(full_name)
    .bind(phone)
    .bind(password_hash)
    .bind(request.is_active)
    .bind(auth.user_id)
    .execute(pool)
    .await?;

    if let (true, Some(email)) = (email_changed, email) {
        auth_service::issue_verifications(
            pool,
            &state.config,
            &state.email,
            vec![VerificationTarget {
                user_id: id,
                email,
                full_name: current.user.full_name.clone(),
            }],
        )
        .await?;
    }

    Ok(find_user(pool, auth, id).await?.into())
}

pub async fn delete_user(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<(), AppError> {
    auth.require_admin()?;
    if id == auth.user_id {
        return Err(AppError::invalid("You cannot delete your own account"));
    }
    find_user(pool, auth, id).await?;

    sqlx::query(
        "UPDATE users SET deleted_at = NOW(), deleted_by = $2, is_active = false WHERE id = $1",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(pool)
    .await?;
    sqlx::query(
        "UPDATE student_guardians SET deleted_at = NOW(), deleted_by = $2 WHERE user_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %id, "user deleted");
    Ok(())
}

/// Issue a fresh verification link for a user whose email is unverified.
pub async fn resend_verification(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
) -> Result<(), AppError> {
    if id != auth.user_id {
        auth.require_admin()?;
    }
    let row = find_user(&state.pool, auth, id).await?;
    let email = row
        .user
        .email
        .clone()
        .ok_or_else(|| AppError::invalid("User has no email address"))?;
    if row.user.email_verified_at.is_some() {
        return Err(AppError::invalid("Email is already verified"));
    }

    auth_service::issue_verifications(
        &state.pool,
        &state.config,
        &state.email,
        vec![VerificationTarget {
            user_id: id,
            email,
            full_name: row.user.full_name,
        }],
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::context;

    #[test]
    fn usernames_are_lowercased_and_checked() {
        assert_eq!(validate_username(" Budi.Santoso ").unwrap(), "budi.santoso");
        assert!(validate_username("ab").is_err());
        assert!(validate_username("budi santoso").is_err());
    }

    #[test]
    fn school_admin_cannot_mint_super_admins() {
        let auth = context(role::SCHOOL_ADMIN, Some(Uuid::new_v4()));
        assert!(matches!(
            resolve_user_school(&auth, role::SUPER_ADMIN, None),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn school_users_land_in_callers_school() {
        let school = Uuid::new_v4();
        let auth = context(role::SCHOOL_ADMIN, Some(school));
        assert_eq!(
            resolve_user_school(&auth, role::FINANCE, None).unwrap(),
            Some(school)
        );
    }

    #[test]
    fn super_admin_role_has_no_school() {
        let auth = context(role::SUPER_ADMIN, None);
        assert_eq!(resolve_user_school(&auth, role::SUPER_ADMIN, None).unwrap(), None);
        assert!(resolve_user_school(&auth, role::SUPER_ADMIN, Some(Uuid::new_v4())).is_err());
        assert!(resolve_user_school(&auth, role::GUARDIAN, None).is_err());
    }
}
