use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::role::{CreateRoleRequest, Role, UpdateRoleRequest};
use crate::pagination::{ListQuery, Page};
use crate::services::validation::{optional_trimmed, required};

const SORTABLE: &[&str] = &["code", "name", "created_at"];

/// Role codes are lower snake case: `finance`, `school_admin`.
fn normalize_role_code(raw: &str) -> Result<String, AppError> {
    let code = required(raw, "code")?.to_ascii_lowercase();
    if code.len() > 32
        || !code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(AppError::invalid(
            "code may only contain lowercase letters, digits and '_' (max 32)",
        ));
    }
    Ok(code)
}

pub async fn create_role(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateRoleRequest,
) -> Result<Role, AppError> {
    auth.require_super_admin()?;
    let code = normalize_role_code(&request.code)?;
    let name = required(&request.name, "name")?;

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM roles WHERE code = $1 AND deleted_at IS NULL)",
    )
    .bind(&code)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!("Role '{code}' already exists")));
    }

    let role = sqlx::query_as::<_, Role>(
        r#"
        INSERT INTO roles (code, name, description, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(name)
    .bind(optional_trimmed(request.description))
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;
    Ok(role)
}

pub async fn get_role(pool: &DbPool, id: Uuid) -> Result<Role, AppError> {
    sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Role"))
}

pub async fn list_roles(pool: &DbPool, query: &ListQuery) -> Result<Page<Role>, AppError> {
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM roles");
    push_filters(&mut count, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM roles");
    push_filters(&mut select, search);
    query.push_page(&mut select, SORTABLE, "code");
    let roles = select.build_query_as::<Role>().fetch_all(pool).await?;

    Ok(Page::new(roles, query, total))
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, search: Option<String>) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(pattern) = search {
        builder
            .push(" AND (code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_role(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateRoleRequest,
) -> Result<Role, AppError> {
    auth.require_super_admin()?;
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;

    sqlx::query_as::<_, Role>(
        r#"
        UPDATE roles
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            updated_by = $4,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(optional_trimmed(request.description))
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Role"))
}

/// Soft delete. Built-in roles and roles still assigned to users are kept.
pub async fn delete_role(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<(), AppError> {
    auth.require_super_admin()?;
    let role = get_role(pool, id).await?;
    if role.is_built_in() {
        return Err(AppError::conflict(format!(
            "Built-in role '{}' cannot be deleted",
            role.code
        )));
    }

    let assigned: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE role_id = $1 AND deleted_at IS NULL)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if assigned {
        return Err(AppError::conflict("Role is still assigned to users"));
    }

    sqlx::query("UPDATE roles SET deleted_at = NOW(), deleted_by = $2 WHERE id = $1")
        .bind(id)
        .bind(auth.user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_codes_are_snake_case() {
        assert_eq!(normalize_role_code(" Treasurer ").unwrap(), "treasurer");
        assert_eq!(normalize_role_code("class_teacher").unwrap(), "class_teacher");
        assert!(normalize_role_code("class-teacher").is_err());
        assert!(normalize_role_code("").is_err());
    }
}
