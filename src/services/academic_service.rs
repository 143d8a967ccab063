//! School years, grades and classes.
//!
//! All three are plain per-school CRUD. The rules worth noting:
//! - a school has at most one active year; activating one deactivates the rest
//! - a class must reference a grade and a year of its own school

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::academic::{
    ClassFilter, CreateSchoolClassRequest, CreateSchoolGradeRequest, CreateSchoolYearRequest,
    SchoolClass, SchoolGrade, SchoolYear, UpdateSchoolClassRequest, UpdateSchoolGradeRequest,
    UpdateSchoolYearRequest,
};
use crate::pagination::{ListQuery, Page};
use crate::services::validation::required;

const YEAR_SORTABLE: &[&str] = &["name", "start_date", "created_at"];
const GRADE_SORTABLE: &[&str] = &["name", "level", "created_at"];
const CLASS_SORTABLE: &[&str] = &["name", "created_at"];

fn push_school_and_search(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    search: Option<String>,
) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = school_id {
        builder.push(" AND school_id = ").push_bind(id);
    }
    if let Some(pattern) = search {
        builder.push(" AND name ILIKE ").push_bind(pattern);
    }
}

// ---- school years ----

pub async fn create_school_year(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateSchoolYearRequest,
) -> Result<SchoolYear, AppError> {
    auth.require_admin()?;
    let school_id = auth.school_scope(request.school_id)?;
    let name = required(&request.name, "name")?;
    if request.end_date <= request.start_date {
        return Err(AppError::invalid("end_date must be after start_date"));
    }

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM school_years WHERE school_id = $1 AND name = $2 AND deleted_at IS NULL)",
    )
    .bind(school_id)
    .bind(&name)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!("School year '{name}' already exists")));
    }

    let mut tx = pool.begin().await?;
    if request.is_active {
        deactivate_years(&mut tx, school_id, auth.user_id).await?;
    }
    let year = sqlx::query_as::<_, SchoolYear>(
        r#"
        INSERT INTO school_years (school_id, name, start_date, end_date, is_active, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $6)
        RETURNING *
        "#,
    )
    .bind(school_id)
    .bind(&name)
    .bind(request.start_date)
    .bind(request.end_date)
    .bind(request.is_active)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(year)
}

async fn deactivate_years(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    school_id: Uuid,
    actor: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE school_years
        SET is_active = false, updated_by = $2, updated_at = NOW()
        WHERE school_id = $1 AND is_active = true AND deleted_at IS NULL
        "#,
    )
    .bind(school_id)
    .bind(actor)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_school_year(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<SchoolYear, AppError> {
    sqlx::query_as::<_, SchoolYear>(
        r#"
        SELECT * FROM school_years
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("School year"))
}

pub async fn list_school_years(
    pool: &DbPool,
    auth: &AuthContext,
    school_id: Option<Uuid>,
    query: &ListQuery,
) -> Result<Page<SchoolYear>, AppError> {
    let school_id = auth.school_filter(school_id);
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM school_years");
    push_school_and_search(&mut count, school_id, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM school_years");
    push_school_and_search(&mut select, school_id, search);
    query.push_page(&mut select, YEAR_SORTABLE, "start_date");
    let years = select.build_query_as::<SchoolYear>().fetch_all(pool).await?;

    Ok(Page::new(years, query, total))
}

pub async fn update_school_year(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateSchoolYearRequest,
) -> Result<SchoolYear, AppError> {
    auth.require_admin()?;
    let current = get_school_year(pool, auth, id).await?;
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;
    let start = request.start_date.unwrap_or(current.start_date);
    let end = request.end_date.unwrap_or(current.end_date);
    if end <= start {
        return Err(AppError::invalid("end_date must be after start_date"));
    }

    let mut tx = pool.begin().await?;
    if request.is_active == Some(true) && !current.is_active {
        deactivate_years(&mut tx, current.school_id, auth.user_id).await?;
    }
    let year = sqlx::query_as::<_, SchoolYear>(
        r#"
        UPDATE school_years
        SET name = COALESCE($2, name),
            start_date = $3,
            end_date = $4,
            is_active = COALESCE($5, is_active),
            updated_by = $6,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(start)
    .bind(end)
    .bind(request.is_active)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(year)
}

pub async fn delete_school_year(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<(), AppError> {
    auth.require_admin()?;
    let in_use: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(SELECT 1 FROM billings WHERE school_year_id = $1 AND deleted_at IS NULL)
            OR EXISTS(SELECT 1 FROM school_classes WHERE school_year_id = $1 AND deleted_at IS NULL)
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if in_use {
        return Err(AppError::conflict("School year is used by classes or billings"));
    }
    soft_delete(pool, "school_years", id, auth, "School year").await
}

// ---- grades ----

pub async fn create_school_grade(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateSchoolGradeRequest,
) -> Result<SchoolGrade, AppError> {
    auth.require_admin()?;
    let school_id = auth.school_scope(request.school_id)?;
    let name = required(&request.name, "name")?;
    if request.level < 0 {
        return Err(AppError::invalid("level must not be negative"));
    }

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM school_grades WHERE school_id = $1 AND name = $2 AND deleted_at IS NULL)",
    )
    .bind(school_id)
    .bind(&name)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!("Grade '{name}' already exists")));
    }

    let grade = sqlx::query_as::<_, SchoolGrade>(
        r#"
        INSERT INTO school_grades (school_id, name, level, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        RETURNING *
        "#,
    )
    .bind(school_id)
    .bind(&name)
    .bind(request.level)
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;
    Ok(grade)
}

pub async fn get_school_grade(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<SchoolGrade, AppError> {
    sqlx::query_as::<_, SchoolGrade>(
        r#"
        SELECT * FROM school_grades
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Grade"))
}

pub async fn list_school_grades(
    pool: &DbPool,
    auth: &AuthContext,
    school_id: Option<Uuid>,
    query: &ListQuery,
) -> Result<Page<SchoolGrade>, AppError> {
    let school_id = auth.school_filter(school_id);
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM school_grades");
    push_school_and_search(&mut count, school_id, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM school_grades");
    push_school_and_search(&mut select, school_id, search);
    query.push_page(&mut select, GRADE_SORTABLE, "level");
    let grades = select.build_query_as::<SchoolGrade>().fetch_all(pool).await?;

    Ok(Page::new(grades, query, total))
}

pub async fn update_school_grade(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateSchoolGradeRequest,
) -> Result<SchoolGrade, AppError> {
    auth.require_admin()?;
    get_school_grade(pool, auth, id).await?;
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;

    let grade = sqlx::query_as::<_, SchoolGrade>(
        r#"
        UPDATE school_grades
        SET name = COALESCE($2, name),
            level = COALESCE($3, level),
            updated_by = $4,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(request.level)
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;
    Ok(grade)
}

pub async fn delete_school_grade(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<(), AppError> {
    auth.require_admin()?;
    let in_use: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM school_classes WHERE school_grade_id = $1 AND deleted_at IS NULL)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if in_use {
        return Err(AppError::conflict("Grade still has classes"));
    }
    soft_delete(pool, "school_grades", id, auth, "Grade").await
}

// ---- classes ----

/// Check that grade and year exist in `school_id`.
async fn check_class_refs(
    pool: &DbPool,
    school_id: Uuid,
    grade_id: Uuid,
    year_id: Option<Uuid>,
) -> Result<(), AppError> {
    let grade_ok: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM school_grades WHERE id = $1 AND school_id = $2 AND deleted_at IS NULL)",
    )
    .bind(grade_id)
    .bind(school_id)
    .fetch_one(pool)
    .await?;
    if !grade_ok {
        return Err(AppError::NotFound("Grade"));
    }

    if let Some(year_id) = year_id {
        let year_ok: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM school_years WHERE id = $1 AND school_id = $2 AND deleted_at IS NULL)",
        )
        .bind(year_id)
        .bind(school_id)
        .fetch_one(pool)
        .await?;
        if !year_ok {
            return Err(AppError::NotFound("School year"));
        }
    }
    Ok(())
}

pub async fn create_school_class(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateSchoolClassRequest,
) -> Result<SchoolClass, AppError> {
    auth.require_admin()?;
    let school_id = auth.school_scope(request.school_id)?;
    let name = required(&request.name, "name")?;
    check_class_refs(
        pool,
        school_id,
        request.school_grade_id,
        Some(request.school_year_id),
    )
    .await?;

    let taken: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM school_classes
            WHERE school_id = $1 AND school_year_id = $2 AND name = $3 AND deleted_at IS NULL
        )
        "#,
    )
    .bind(school_id)
    .bind(request.school_year_id)
    .bind(&name)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!(
            "Class '{name}' already exists in this school year"
        )));
    }

    let class = sqlx::query_as::<_, SchoolClass>(
        r#"
        INSERT INTO school_classes (school_id, school_grade_id, school_year_id, name, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING *
        "#,
    )
    .bind(school_id)
    .bind(request.school_grade_id)
    .bind(request.school_year_id)
    .bind(&name)
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;
    Ok(class)
}

pub async fn get_school_class(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<SchoolClass, AppError> {
    sqlx::query_as::<_, SchoolClass>(
        r#"
        SELECT * FROM school_classes
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Class"))
}

pub async fn list_school_classes(
    pool: &DbPool,
    auth: &AuthContext,
    filter: &ClassFilter,
    query: &ListQuery,
) -> Result<Page<SchoolClass>, AppError> {
    let school_id = auth.school_filter(filter.school_id);
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM school_classes");
    push_class_filters(&mut count, school_id, filter, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM school_classes");
    push_class_filters(&mut select, school_id, filter, search);
    query.push_page(&mut select, CLASS_SORTABLE, "name");
    let classes = select.build_query_as::<SchoolClass>().fetch_all(pool).await?;

    Ok(Page::new(classes, query, total))
}

fn push_class_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    filter: &ClassFilter,
    search: Option<String>,
) {
    push_school_and_search(builder, school_id, search);
    if let Some(grade) = filter.school_grade_id {
        builder.push(" AND school_grade_id = ").push_bind(grade);
    }
    if let Some(year) = filter.school_year_id {
        builder.push(" AND school_year_id = ").push_bind(year);
    }
}

pub async fn update_school_class(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateSchoolClassRequest,
) -> Result<SchoolClass, AppError> {
    auth.require_admin()?;
    let current = get_school_class(pool, auth, id).await?;
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;
    if let Some(grade_id) = request.school_grade_id {
        check_class_refs(pool, current.school_id, grade_id, None).await?;
    }

    let class = sqlx::query_as::<_, SchoolClass>(
        r#"
        UPDATE school_classes
        SET name = COALESCE($2, name),
            school_grade_id = COALESCE($3, school_grade_id),
            updated_by = $4,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(request.school_grade_id)
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;
    Ok(class)
}

pub async fn delete_school_class(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<(), AppError> {
    auth.require_admin()?;
    let in_use: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM students WHERE school_class_id = $1 AND deleted_at IS NULL)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if in_use {
        return Err(AppError::conflict("Class still has students"));
    }
    soft_delete(pool, "school_classes", id, auth, "Class").await
}

/// Soft-delete a row of a school-scoped table.
///
/// `table` is always a literal from this module, never user input.
async fn soft_delete(
    pool: &DbPool,
    table: &'static str,
    id: Uuid,
    auth: &AuthContext,
    entity: &'static str,
) -> Result<(), AppError> {
    let sql = format!(
        "UPDATE {table} SET deleted_at = NOW(), deleted_by = $2 \
         WHERE id = $1 AND deleted_at IS NULL AND ($3::uuid IS NULL OR school_id = $3)"
    );
    let result = sqlx::query(&sql)
        .bind(id)
        .bind(auth.user_id)
        .bind(auth.school_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(entity));
    }
    Ok(())
}
