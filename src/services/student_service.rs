//! Students and their guardian links.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::role;
use crate::models::student::{
    AttachGuardianRequest, CreateStudentRequest, Student, StudentFilter, StudentGuardian,
    UpdateStudentRequest,
};
use crate::pagination::{ListQuery, Page};
use crate::services::billing_service;
use crate::services::validation::{normalize_gender, optional_trimmed, required};

const SORTABLE: &[&str] = &["nis", "name", "created_at", "updated_at"];

const RELATIONS: &[&str] = &["father", "mother", "guardian"];

pub fn normalize_nis(raw: &str) -> Result<String, AppError> {
    let nis = required(raw, "nis")?;
    if nis.len() > 32 || !nis.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-') {
        return Err(AppError::invalid(format!(
            "NIS '{nis}' may only contain letters, digits, '.' and '-' (max 32)"
        )));
    }
    Ok(nis)
}

pub fn normalize_relation(raw: Option<&str>) -> Result<String, AppError> {
    let relation = raw
        .map(|r| r.trim().to_ascii_lowercase())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "guardian".to_string());
    if !RELATIONS.contains(&relation.as_str()) {
        return Err(AppError::invalid(format!(
            "relation must be one of {}",
            RELATIONS.join(", ")
        )));
    }
    Ok(relation)
}

pub async fn nis_taken(
    pool: &DbPool,
    school_id: Uuid,
    nis: &str,
    except: Option<Uuid>,
) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM students
            WHERE school_id = $1 AND nis = $2 AND deleted_at IS NULL
              AND ($3::uuid IS NULL OR id <> $3)
        )
        "#,
    )
    .bind(school_id)
    .bind(nis)
    .bind(except)
    .fetch_one(pool)
    .await?)
}

/// Fail unless `class_id` is a live class of `school_id`.
async fn check_class(pool: &DbPool, school_id: Uuid, class_id: Uuid) -> Result<(), AppError> {
    let class_school: Option<Uuid> = sqlx::query_scalar(
        "SELECT school_id FROM school_classes WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(class_id)
    .fetch_optional(pool)
    .await?;
    match class_school {
        Some(id) if id == school_id => Ok(()),
        Some(_) => Err(AppError::invalid("Class belongs to another school")),
        None => Err(AppError::NotFound("Class")),
    }
}

pub async fn create_student(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateStudentRequest,
) -> Result<Student, AppError> {
    auth.require_admin()?;
    let school_id = auth.school_scope(request.school_id)?;
    let nis = normalize_nis(&request.nis)?;
    let name = required(&request.name, "name")?;
    let gender = normalize_gender(request.gender)?;
    if let Some(class_id) = request.school_class_id {
        check_class(pool, school_id, class_id).await?;
    }
    if nis_taken(pool, school_id, &nis, None).await? {
        return Err(AppError::conflict(format!("NIS '{nis}' is already registered")));
    }

    let student = sqlx::query_as::<_, Student>(
        r#"
        INSERT INTO students (school_id, school_class_id, nis, name, gender, birth_date, address, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(school_id)
    .bind(request.school_class_id)
    .bind(&nis)
    .bind(name)
    .bind(gender)
    .bind(request.birth_date)
    .bind(optional_trimmed(request.address))
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(student_id = %student.id, %nis, "student created");
    Ok(student)
}

/// Load a student the caller may see.
///
/// Staff see every student of their school; guardians only the students
/// they are linked to. Anything else is reported as not found.
pub async fn get_student(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<Student, AppError> {
    let student =
        sqlx::query_as::<_, Student>("SELECT * FROM students WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .filter(|s| auth.can_access_school(s.school_id))
            .ok_or(AppError::NotFound("Student"))?;

    if auth.is_guardian() && !is_guardian_of(pool, auth.user_id, id).await? {
        return Err(AppError::NotFound("Student"));
    }
    if !auth.is_guardian() {
        auth.require_staff()?;
    }
    Ok(student)
}

pub async fn is_guardian_of(
    pool: &DbPool,
    user_id: Uuid,
    student_id: Uuid,
) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM student_guardians
            WHERE user_id = $1 AND student_id = $2 AND deleted_at IS NULL
        )
        "#,
    )
    .bind(user_id)
    .bind(student_id)
    .fetch_one(pool)
    .await?)
}

pub async fn list_students(
    pool: &DbPool,
    auth: &AuthContext,
    filter: &StudentFilter,
    query: &ListQuery,
) -> Result<Page<Student>, AppError> {
    if !auth.is_guardian() {
        auth.require_staff()?;
    }
    let scope = StudentScope {
        school_id: auth.school_filter(filter.school_id),
        guardian_id: auth.is_guardian().then_some(auth.user_id),
        class_id: filter.school_class_id,
        is_active: filter.is_active,
        search: query.search_pattern(),
    };

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM students");
    push_filters(&mut count, &scope);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM students");
    push_filters(&mut select, &scope);
    query.push_page(&mut select, SORTABLE, "created_at");
    let students = select.build_query_as::<Student>().fetch_all(pool).await?;

    Ok(Page::new(students, query, total))
}

struct StudentScope {
    school_id: Option<Uuid>,
    guardian_id: Option<Uuid>,
    class_id: Option<Uuid>,
    is_active: Option<bool>,
    search: Option<String>,
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, scope: &StudentScope) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = scope.school_id {
        builder.push(" AND school_id = ").push_bind(id);
    }
    if let Some(guardian) = scope.guardian_id {
        builder
            .push(" AND id IN (SELECT student_id FROM student_guardians WHERE deleted_at IS NULL AND user_id = ")
            .push_bind(guardian)
            .push(")");
    }
    if let Some(id) = scope.class_id {
        builder.push(" AND school_class_id = ").push_bind(id);
    }
    if let Some(active) = scope.is_active {
        builder.push(" AND is_active = ").push_bind(active);
    }
    if let Some(pattern) = scope.search.clone() {
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR nis ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_student(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateStudentRequest,
) -> Result<Student, AppError> {
    auth.require_admin()?;
    let current = get_student(pool, auth, id).await?;
    if let Some(class_id) = request.school_class_id {
        check_class(pool, current.school_id, class_id).await?;
    }
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;
    let gender = normalize_gender(request.gender)?;

    sqlx::query_as::<_, Student>(
        r#"
        UPDATE students
        SET school_class_id = COALESCE($2, school_class_id),
            name = COALESCE($3, name),
            gender = COALESCE($4, gender),
            birth_date = COALESCE($5, birth_date),
            address = COALESCE($6, address),
            is_active = COALESCE($7, is_active),
            updated_by = $8,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(request.school_class_id)
    .bind(name)
    .bind(gender)
    .bind(request.birth_date)
    .bind(optional_trimmed(request.address))
    .bind(request.is_active)
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Student"))
}

/// Soft delete. Refused while the student has paid or in-flight installments.
pub async fn delete_student(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<(), AppError> {
    auth.require_admin()?;
    get_student(pool, auth, id).await?;

    let mut tx = pool.begin().await?;
    // Held until commit so no payment can claim an installment mid-delete
    let statuses: Vec<String> = sqlx::query_scalar(
        "SELECT status FROM billing_students WHERE student_id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;
    if billing_service::any_claimed(&statuses) {
        return Err(AppError::conflict("Student has paid or pending billings"));
    }

    sqlx::query("UPDATE students SET deleted_at = NOW(), deleted_by = $2 WHERE id = $1")
        .bind(id)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "UPDATE billing_students SET deleted_at = NOW(), deleted_by = $2 WHERE student_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE student_guardians SET deleted_at = NOW(), deleted_by = $2 WHERE student_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(student_id = %id, "student deleted");
    Ok(())
}

pub async fn list_guardians(
    pool: &DbPool,
    auth: &AuthContext,
    student_id: Uuid,
) -> Result<Vec<StudentGuardian>, AppError> {
    get_student(pool, auth, student_id).await?;
    let guardians = sqlx::query_as::<_, StudentGuardian>(
        r#"
        SELECT sg.id, sg.student_id, sg.user_id, sg.relation, u.full_name, u.email, u.phone
        FROM student_guardians sg
        JOIN users u ON u.id = sg.user_id
        WHERE sg.student_id = $1 AND sg.deleted_at IS NULL AND u.deleted_at IS NULL
        ORDER BY sg.created_at
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    Ok(guardians)
}

pub async fn attach_guardian(
    pool: &DbPool,
    auth: &AuthContext,
    student_id: Uuid,
    request: AttachGuardianRequest,
) -> Result<Vec<StudentGuardian>, AppError> {
    auth.require_admin()?;
    let student = get_student(pool, auth, student_id).await?;
    let relation = normalize_relation(Some(&request.relation))?;

    let guardian: Option<(Option<Uuid>, String)> = sqlx::query_as(
        r#"
        SELECT u.school_id, r.code
        FROM users u JOIN roles r ON r.id = u.role_id
        WHERE u.id = $1 AND u.deleted_at IS NULL
        "#,
    )
    .bind(request.user_id)
    .fetch_optional(pool)
    .await?;
    match guardian {
        Some((Some(school), code)) if school == student.school_id && code == role::GUARDIAN => {}
        Some(_) => {
            return Err(AppError::invalid(
                "User must be a guardian of the student's school",
            ));
        }
        None => return Err(AppError::NotFound("User")),
    }

    if is_guardian_of(pool, request.user_id, student_id).await? {
        return Err(AppError::conflict("Guardian is already linked to this student"));
    }

    sqlx::query(
        r#"
        INSERT INTO student_guardians (student_id, user_id, relation, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $4)
        "#,
    )
    .bind(student_id)
    .bind(request.user_id)
    .bind(relation)
    .bind(auth.user_id)
    .execute(pool)
    .await?;

    list_guardians(pool, auth, student_id).await
}

pub async fn detach_guardian(
    pool: &DbPool,
    auth: &AuthContext,
    student_id: Uuid,
    user_id: Uuid,
) -> Result<(), AppError> {
    auth.require_admin()?;
    get_student(pool, auth, student_id).await?;

    let result = sqlx::query(
        r#"
        UPDATE student_guardians SET deleted_at = NOW(), deleted_by = $3
        WHERE student_id = $1 AND user_id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(student_id)
    .bind(user_id)
    .bind(auth.user_id)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Guardian link"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::clients::gateway::mock::MockGateway;
    use crate::models::billing::GenerateBillingRequest;
    use crate::state::test_support::{Fixture, db_state};

    #[test]
    fn nis_allows_dotted_numbers() {
        assert_eq!(normalize_nis(" 2025.001 ").unwrap(), "2025.001");
        assert!(normalize_nis("2025 001").is_err());
        assert!(normalize_nis("").is_err());
    }

    #[test]
    fn relation_defaults_to_guardian() {
        assert_eq!(normalize_relation(None).unwrap(), "guardian");
        assert_eq!(normalize_relation(Some(" Mother ")).unwrap(), "mother");
        assert!(normalize_relation(Some("uncle")).is_err());
    }

    #[tokio::test]
    async fn student_with_a_paid_installment_is_not_deleted() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let pool = &state.pool;
        let fx = Fixture::seed(pool).await;
        let paying = fx.student(pool, "4001").await;
        let leaving = fx.student(pool, "4002").await;
        fx.guardian(pool, leaving).await;
        let due = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        let billing = fx.billing(pool, &[due]).await;
        billing_service::generate_billing(
            pool,
            &fx.admin(),
            billing,
            GenerateBillingRequest { student_ids: None },
        )
        .await
        .unwrap();
        sqlx::query("UPDATE billing_students SET status = 'paid', paid_at = NOW() WHERE student_id = $1")
            .bind(paying)
            .execute(pool)
            .await
            .unwrap();

        let err = delete_student(pool, &fx.admin(), paying).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(get_student(pool, &fx.admin(), paying).await.is_ok());

        delete_student(pool, &fx.admin(), leaving).await.unwrap();
        assert!(matches!(
            get_student(pool, &fx.admin(), leaving).await,
            Err(AppError::NotFound(_))
        ));
        assert!(fx.installments(pool, leaving).await.is_empty());
        let links: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM student_guardians WHERE student_id = $1 AND deleted_at IS NULL",
        )
        .bind(leaving)
        .fetch_one(pool)
        .await
        .unwrap();
        assert_eq!(links, 0);
    }
}
