//! Schools: the tenants of the system.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::school::{CreateSchoolRequest, School, UpdateSchoolRequest};
use crate::pagination::{ListQuery, Page};
use crate::services::validation::{normalize_code, optional_trimmed, required};

const SORTABLE: &[&str] = &["code", "name", "created_at", "updated_at"];

pub async fn create_school(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateSchoolRequest,
) -> Result<School, AppError> {
    auth.require_super_admin()?;
    let code = normalize_code(&request.code, "code")?;
    let name = required(&request.name, "name")?;

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM schools WHERE code = $1 AND deleted_at IS NULL)",
    )
    .bind(&code)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!("School code '{code}' is already used")));
    }

    let school = sqlx::query_as::<_, School>(
        r#"
        INSERT INTO schools (code, name, address, province_id, city_id, phone, email, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(&code)
    .bind(name)
    .bind(optional_trimmed(request.address))
    .bind(optional_trimmed(request.province_id))
    .bind(optional_trimmed(request.city_id))
    .bind(optional_trimmed(request.phone))
    .bind(optional_trimmed(request.email))
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(school_id = %school.id, %code, "school created");
    Ok(school)
}

/// Fetch a live school the caller may see.
pub async fn get_school(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<School, AppError> {
    if !auth.can_access_school(id) {
        return Err(AppError::NotFound("School"));
    }
    sqlx::query_as::<_, School>("SELECT * FROM schools WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("School"))
}

pub async fn list_schools(
    pool: &DbPool,
    auth: &AuthContext,
    query: &ListQuery,
) -> Result<Page<School>, AppError> {
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM schools");
    push_filters(&mut count, auth.school_id, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM schools");
    push_filters(&mut select, auth.school_id, search);
    query.push_page(&mut select, SORTABLE, "created_at");
    let schools = select.build_query_as::<School>().fetch_all(pool).await?;

    Ok(Page::new(schools, query, total))
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    search: Option<String>,
) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = school_id {
        builder.push(" AND id = ").push_bind(id);
    }
    if let Some(pattern) = search {
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR code ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_school(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateSchoolRequest,
) -> Result<School, AppError> {
    auth.require_admin()?;
    if !auth.can_access_school(id) {
        return Err(AppError::NotFound("School"));
    }
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;

    sqlx::query_as::<_, School>(
        r#"
        UPDATE schools
        SET name = COALESCE($2, name),
            address = COALESCE($3, address),
            province_id = COALESCE($4, province_id),
            city_id = COALESCE($5, city_id),
            phone = COALESCE($6, phone),
            email = COALESCE($7, email),
            updated_by = $8,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(optional_trimmed(request.address))
    .bind(optional_trimmed(request.province_id))
    .bind(optional_trimmed(request.city_id))
    .bind(optional_trimmed(request.phone))
    .bind(optional_trimmed(request.email))
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("School"))
}

/// Soft delete. Refused while the school still has active students.
pub async fn delete_school(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<(), AppError> {
    auth.require_super_admin()?;

    let has_students: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM students WHERE school_id = $1 AND deleted_at IS NULL)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if has_students {
        return Err(AppError::conflict("School still has students"));
    }

    let result = sqlx::query(
        "UPDATE schools SET deleted_at = NOW(), deleted_by = $2 WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("School"));
    }
    tracing::info!(school_id = %id, "school deleted");
    Ok(())
}

/// Code of a live school, used in generated numbers.
pub async fn school_code<'e, E>(executor: E, school_id: Uuid) -> Result<String, AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT code FROM schools WHERE id = $1 AND deleted_at IS NULL")
        .bind(school_id)
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("School"))
}
