use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::billing_type::{BillingType, CreateBillingTypeRequest, UpdateBillingTypeRequest};
use crate::pagination::{ListQuery, Page};
use crate::services::validation::{normalize_code, optional_trimmed, required};

const SORTABLE: &[&str] = &["code", "name", "created_at"];

pub async fn create_billing_type(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateBillingTypeRequest,
) -> Result<BillingType, AppError> {
    auth.require_staff()?;
    let school_id = auth.school_scope(request.school_id)?;
    let code = normalize_code(&request.code, "code")?;
    let name = required(&request.name, "name")?;

    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM billing_types WHERE school_id = $1 AND code = $2 AND deleted_at IS NULL
        )
        "#,
    )
    .bind(school_id)
    .bind(&code)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!("Billing type '{code}' already exists")));
    }

    let billing_type = sqlx::query_as::<_, BillingType>(
        r#"
        INSERT INTO billing_types (school_id, code, name, description, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING *
        "#,
    )
    .bind(school_id)
    .bind(&code)
    .bind(name)
    .bind(optional_trimmed(request.description))
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;
    Ok(billing_type)
}

pub async fn get_billing_type(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<BillingType, AppError> {
    sqlx::query_as::<_, BillingType>(
        r#"
        SELECT * FROM billing_types
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Billing type"))
}

pub async fn list_billing_types(
    pool: &DbPool,
    auth: &AuthContext,
    school_id: Option<Uuid>,
    query: &ListQuery,
) -> Result<Page<BillingType>, AppError> {
    let school_id = auth.school_filter(school_id);
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM billing_types");
    push_filters(&mut count, school_id, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM billing_types");
    push_filters(&mut select, school_id, search);
    query.push_page(&mut select, SORTABLE, "code");
    let types = select.build_query_as::<BillingType>().fetch_all(pool).await?;

    Ok(Page::new(types, query, total))
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    search: Option<String>,
) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = school_id {
        builder.push(" AND school_id = ").push_bind(id);
    }
    if let Some(pattern) = search {
        builder
            .push(" AND (code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR name ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_billing_type(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateBillingTypeRequest,
) -> Result<BillingType, AppError> {
    auth.require_staff()?;
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;

    sqlx::query_as::<_, BillingType>(
        r#"
        UPDATE billing_types
        SET name = COALESCE($3, name),
            description = COALESCE($4, description),
            updated_by = $5,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .bind(name)
    .bind(optional_trimmed(request.description))
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Billing type"))
}

/// Soft delete. Types still used by a billing are kept.
pub async fn delete_billing_type(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<(), AppError> {
    auth.require_staff()?;
    get_billing_type(pool, auth, id).await?;

    let used: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM billings WHERE billing_type_id = $1 AND deleted_at IS NULL)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if used {
        return Err(AppError::conflict("Billing type is used by billings"));
    }

    sqlx::query("UPDATE billing_types SET deleted_at = NOW(), deleted_by = $2 WHERE id = $1")
        .bind(id)
        .bind(auth.user_id)
        .execute(pool)
        .await?;
    Ok(())
}
