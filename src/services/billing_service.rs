//! Billings, their installments and the fan-out to students.
//!
//! A billing is created with its details (installments) in one transaction
//! and receives a `BILL/<school>/<year>/<seq>` number. Generating a billing
//! creates one `billing_students` row per detail and target student, skipping
//! pairs that already exist, so generation can be repeated safely after new
//! students join.

use std::collections::HashSet;

use chrono::{Datelike, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::{self, DbPool};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::billing::{
    Billing, BillingDetail, BillingDetailInput, BillingFilter, BillingStatus,
    BillingStudentFilter, BillingStudentView, BillingWithDetails, CreateBillingRequest,
    GenerateBillingRequest, GenerateBillingResponse, NewBillingStudent, UpdateBillingRequest,
};
use crate::pagination::{ListQuery, Page};
use crate::services::validation::{normalize_code, optional_trimmed, required};
use crate::services::{school_service, student_service};

const SORTABLE: &[&str] = &["code", "name", "billing_number", "created_at"];
const ITEM_SORTABLE: &[&str] = &["due_date", "amount", "status", "created_at"];

/// Rows per multi-row insert when fanning out.
const INSERT_CHUNK: usize = 1000;

pub fn format_billing_number(school_code: &str, year: i32, seq: i64) -> String {
    format!("BILL/{school_code}/{year}/{seq:05}")
}

/// Counters follow the school code, the part the number is built from, so a
/// code taken over from a deleted school continues its numbering.
fn billing_sequence_scope(school_code: &str, year: i32) -> String {
    format!("billing:{school_code}:{year}")
}

/// Check installments: at least one, named, and with a positive amount
/// unless the billing is a donation.
pub fn validate_details(details: &[BillingDetailInput], is_donation: bool) -> Result<(), AppError> {
    if details.is_empty() {
        return Err(AppError::invalid("A billing needs at least one detail"));
    }
    for (i, detail) in details.iter().enumerate() {
        let n = i + 1;
        if detail.name.trim().is_empty() {
            return Err(AppError::invalid(format!("detail {n}: name is required")));
        }
        let valid_amount = if is_donation {
            detail.amount >= 0
        } else {
            detail.amount > 0
        };
        if !valid_amount {
            return Err(AppError::invalid(format!(
                "detail {n}: amount must be {}",
                if is_donation { "zero or more" } else { "positive" }
            )));
        }
    }
    Ok(())
}

/// True when any installment status is past `unpaid`.
pub fn any_claimed(statuses: &[String]) -> bool {
    statuses
        .iter()
        .any(|status| status != BillingStatus::Unpaid.as_str())
}

/// Plan the billing students for `students`, skipping pairs in `existing`.
///
/// Returns the rows to insert and how many pairs were skipped. Output is
/// ordered student by student, detail by detail.
pub fn plan_billing_students(
    details: &[BillingDetail],
    students: &[Uuid],
    existing: &HashSet<(Uuid, Uuid)>,
) -> (Vec<NewBillingStudent>, usize) {
    let mut planned = Vec::with_capacity(details.len() * students.len());
    let mut skipped = 0;
    let mut seen = HashSet::new();

    for &student_id in students {
        if !seen.insert(student_id) {
            continue;
        }
        for detail in details {
            if existing.contains(&(detail.id, student_id)) {
                skipped += 1;
                continue;
            }
            planned.push(NewBillingStudent {
                billing_detail_id: detail.id,
                student_id,
                amount: detail.amount,
                due_date: detail.due_date,
            });
        }
    }
    (planned, skipped)
}

/// Fail unless `table` has a live row `id` in `school_id`.
async fn check_school_ref(
    pool: &DbPool,
    table: &'static str,
    entity: &'static str,
    id: Uuid,
    school_id: Uuid,
) -> Result<(), AppError> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {table} WHERE id = $1 AND school_id = $2 AND deleted_at IS NULL)"
    );
    let found: bool = sqlx::query_scalar(&sql)
        .bind(id)
        .bind(school_id)
        .fetch_one(pool)
        .await?;
    if found {
        Ok(())
    } else {
        Err(AppError::NotFound(entity))
    }
}

pub async fn create_billing(
    pool: &DbPool,
    auth: &AuthContext,
    request: CreateBillingRequest,
) -> Result<BillingWithDetails, AppError> {
    auth.require_staff()?;
    let school_id = auth.school_scope(request.school_id)?;
    let code = normalize_code(&request.code, "code")?;
    let name = required(&request.name, "name")?;
    validate_details(&request.details, request.is_donation)?;

    check_school_ref(pool, "billing_types", "Billing type", request.billing_type_id, school_id)
        .await?;
    check_school_ref(pool, "school_years", "School year", request.school_year_id, school_id)
        .await?;
    if let Some(grade_id) = request.school_grade_id {
        check_school_ref(pool, "school_grades", "Grade", grade_id, school_id).await?;
    }
    if let Some(class_id) = request.school_class_id {
        let (grade_id, year_id): (Uuid, Uuid) = sqlx::query_as(
            r#"
            SELECT school_grade_id, school_year_id FROM school_classes
            WHERE id = $1 AND school_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(class_id)
        .bind(school_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Class"))?;
        if request.school_grade_id.is_some_and(|g| g != grade_id) {
            return Err(AppError::invalid("Class does not belong to the given grade"));
        }
        if year_id != request.school_year_id {
            return Err(AppError::invalid("Class does not belong to the given school year"));
        }
    }

    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM billings WHERE school_id = $1 AND code = $2 AND deleted_at IS NULL)",
    )
    .bind(school_id)
    .bind(&code)
    .fetch_one(pool)
    .await?;
    if taken {
        return Err(AppError::conflict(format!("Billing code '{code}' is already used")));
    }

    let mut tx = pool.begin().await?;

    let school_code = school_service::school_code(&mut *tx, school_id).await?;
    let year = Utc::now().year();
    let seq = db::next_sequence(&mut *tx, &billing_sequence_scope(&school_code, year)).await?;
    let billing_number = format_billing_number(&school_code, year, seq);

    let billing_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO billings
            (school_id, billing_type_id, school_year_id, school_grade_id, school_class_id,
             code, billing_number, name, description, is_donation, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
        RETURNING id
        "#,
    )
    .bind(school_id)
    .bind(request.billing_type_id)
    .bind(request.school_year_id)
    .bind(request.school_grade_id)
    .bind(request.school_class_id)
    .bind(&code)
    .bind(&billing_number)
    .bind(name)
    .bind(optional_trimmed(request.description))
    .bind(request.is_donation)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO billing_details (billing_id, name, amount, due_date, sequence, created_by, updated_by) ",
    );
    builder.push_values(request.details.iter().enumerate(), |mut row, (i, detail)| {
        row.push_bind(billing_id)
            .push_bind(detail.name.trim().to_string())
            .push_bind(detail.amount)
            .push_bind(detail.due_date)
            .push_bind(i as i32 + 1)
            .push_bind(auth.user_id)
            .push_bind(auth.user_id);
    });
    builder.build().execute(&mut *tx).await?;

    tx.commit().await?;

    tracing::info!(%billing_id, %billing_number, details = request.details.len(), "billing created");
    get_billing(pool, auth, billing_id).await
}

async fn find_billing(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<Billing, AppError> {
    sqlx::query_as::<_, Billing>(
        r#"
        SELECT * FROM billings
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Billing"))
}

pub async fn billing_details(pool: &DbPool, billing_id: Uuid) -> Result<Vec<BillingDetail>, AppError> {
    let details = sqlx::query_as::<_, BillingDetail>(
        "SELECT * FROM billing_details WHERE billing_id = $1 AND deleted_at IS NULL ORDER BY sequence",
    )
    .bind(billing_id)
    .fetch_all(pool)
    .await?;
    Ok(details)
}

pub async fn get_billing(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<BillingWithDetails, AppError> {
    auth.require_staff()?;
    let billing = find_billing(pool, auth, id).await?;
    let details = billing_details(pool, id).await?;
    let total_amount = details.iter().map(|d| d.amount).sum();
    Ok(BillingWithDetails {
        billing,
        details,
        total_amount,
    })
}

pub async fn list_billings(
    pool: &DbPool,
    auth: &AuthContext,
    filter: &BillingFilter,
    query: &ListQuery,
) -> Result<Page<Billing>, AppError> {
    auth.require_staff()?;
    let school_id = auth.school_filter(filter.school_id);
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM billings");
    push_filters(&mut count, school_id, filter, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM billings");
    push_filters(&mut select, school_id, filter, search);
    query.push_page(&mut select, SORTABLE, "created_at");
    let billings = select.build_query_as::<Billing>().fetch_all(pool).await?;

    Ok(Page::new(billings, query, total))
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    filter: &BillingFilter,
    search: Option<String>,
) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = school_id {
        builder.push(" AND school_id = ").push_bind(id);
    }
    if let Some(id) = filter.billing_type_id {
        builder.push(" AND billing_type_id = ").push_bind(id);
    }
    if let Some(id) = filter.school_year_id {
        builder.push(" AND school_year_id = ").push_bind(id);
    }
    if let Some(id) = filter.school_grade_id {
        builder.push(" AND school_grade_id = ").push_bind(id);
    }
    if let Some(id) = filter.school_class_id {
        builder.push(" AND school_class_id = ").push_bind(id);
    }
    if let Some(pattern) = search {
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR billing_number ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_billing(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: UpdateBillingRequest,
) -> Result<BillingWithDetails, AppError> {
    auth.require_staff()?;
    let billing = find_billing(pool, auth, id).await?;
    if let Some(type_id) = request.billing_type_id {
        check_school_ref(pool, "billing_types", "Billing type", type_id, billing.school_id)
            .await?;
    }
    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;

    sqlx::query(
        r#"
        UPDATE billings
        SET name = COALESCE($2, name),
            description = COALESCE($3, description),
            billing_type_id = COALESCE($4, billing_type_id),
            updated_by = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(optional_trimmed(request.description))
    .bind(request.billing_type_id)
    .bind(auth.user_id)
    .execute(pool)
    .await?;

    get_billing(pool, auth, id).await
}

/// Soft delete the billing with its details and unpaid student rows.
///
/// Refused once any installment is paid or waiting on a transaction.
pub async fn delete_billing(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<(), AppError> {
    auth.require_staff()?;
    find_billing(pool, auth, id).await?;

    let mut tx = pool.begin().await?;
    // Locked for the rest of the delete: a payment claiming one of these rows
    // either commits first and is seen here, or waits and finds it deleted
    let statuses: Vec<String> = sqlx::query_scalar(
        "SELECT status FROM billing_students WHERE billing_id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;
    if any_claimed(&statuses) {
        return Err(AppError::conflict(
            "Billing has paid or pending installments and cannot be deleted",
        ));
    }

    for sql in [
        "UPDATE billing_students SET deleted_at = NOW(), deleted_by = $2 WHERE billing_id = $1 AND deleted_at IS NULL",
        "UPDATE billing_details SET deleted_at = NOW(), deleted_by = $2 WHERE billing_id = $1 AND deleted_at IS NULL",
        "UPDATE billings SET deleted_at = NOW(), deleted_by = $2 WHERE id = $1",
    ] {
        sqlx::query(sql)
            .bind(id)
            .bind(auth.user_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(billing_id = %id, "billing deleted");
    Ok(())
}

/// Students a billing targets: its class, else its grade in the billing's
/// year, else the whole school. Only active students count.
async fn target_students(pool: &DbPool, billing: &Billing) -> Result<Vec<Uuid>, AppError> {
    let ids = if let Some(class_id) = billing.school_class_id {
        sqlx::query_scalar(
            r#"
            SELECT id FROM students
            WHERE school_class_id = $1 AND is_active AND deleted_at IS NULL
            ORDER BY nis
            "#,
        )
        .bind(class_id)
        .fetch_all(pool)
        .await?
    } else if let Some(grade_id) = billing.school_grade_id {
        sqlx::query_scalar(
            r#"
            SELECT s.id FROM students s
            JOIN school_classes c ON c.id = s.school_class_id
            WHERE c.school_grade_id = $1 AND c.school_year_id = $2
              AND c.deleted_at IS NULL AND s.is_active AND s.deleted_at IS NULL
            ORDER BY s.nis
            "#,
        )
        .bind(grade_id)
        .bind(billing.school_year_id)
        .fetch_all(pool)
        .await?
    } else {
        sqlx::query_scalar(
            r#"
            SELECT id FROM students
            WHERE school_id = $1 AND is_active AND deleted_at IS NULL
            ORDER BY nis
            "#,
        )
        .bind(billing.school_id)
        .fetch_all(pool)
        .await?
    };
    Ok(ids)
}

/// Explicit targets must all be active students of the billing's school.
async fn explicit_students(
    pool: &DbPool,
    billing: &Billing,
    requested: &[Uuid],
) -> Result<Vec<Uuid>, AppError> {
    if requested.is_empty() {
        return Err(AppError::invalid("student_ids must not be empty"));
    }
    let found: HashSet<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM students
        WHERE id = ANY($1) AND school_id = $2 AND is_active AND deleted_at IS NULL
        "#,
    )
    .bind(requested)
    .bind(billing.school_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    if let Some(missing) = requested.iter().find(|id| !found.contains(*id)) {
        return Err(AppError::invalid(format!(
            "Student {missing} is not an active student of this school"
        )));
    }
    Ok(requested.to_vec())
}

pub async fn generate_billing(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
    request: GenerateBillingRequest,
) -> Result<GenerateBillingResponse, AppError> {
    auth.require_staff()?;
    let billing = find_billing(pool, auth, id).await?;
    let details = billing_details(pool, id).await?;

    let students = match request.student_ids.as_deref() {
        Some(requested) => explicit_students(pool, &billing, requested).await?,
        None => target_students(pool, &billing).await?,
    };

    let existing: HashSet<(Uuid, Uuid)> = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT billing_detail_id, student_id FROM billing_students WHERE billing_id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    let (planned, mut skipped) = plan_billing_students(&details, &students, &existing);

    let mut created = 0usize;
    let mut tx = pool.begin().await?;
    for chunk in planned.chunks(INSERT_CHUNK) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO billing_students (billing_id, billing_detail_id, student_id, school_id, amount, due_date, status, created_by, updated_by) ",
        );
        builder.push_values(chunk, |mut row, item| {
            row.push_bind(id)
                .push_bind(item.billing_detail_id)
                .push_bind(item.student_id)
                .push_bind(billing.school_id)
                .push_bind(item.amount)
                .push_bind(item.due_date)
                .push_bind(BillingStatus::Unpaid.as_str())
                .push_bind(auth.user_id)
                .push_bind(auth.user_id);
        });
        // A concurrent generate may have inserted some pairs since we looked
        builder.push(
            " ON CONFLICT (billing_detail_id, student_id) WHERE deleted_at IS NULL DO NOTHING",
        );
        let inserted = builder.build().execute(&mut *tx).await?.rows_affected() as usize;
        skipped += chunk.len() - inserted;
        created += inserted;
    }
    tx.commit().await?;

    let unique_students = students.iter().collect::<HashSet<_>>().len();
    tracing::info!(
        billing_id = %id,
        students = unique_students,
        created,
        skipped,
        "billing generated"
    );
    Ok(GenerateBillingResponse {
        students: unique_students,
        created,
        skipped,
    })
}

const ITEM_SELECT: &str = r#"
    SELECT bs.*, b.name AS billing_name, b.billing_number, d.name AS detail_name,
           s.name AS student_name, s.nis AS student_nis
    FROM billing_students bs
    JOIN billings b ON b.id = bs.billing_id
    JOIN billing_details d ON d.id = bs.billing_detail_id
    JOIN students s ON s.id = bs.student_id
"#;

const ITEM_COUNT: &str = "SELECT COUNT(*) FROM billing_students bs";

pub async fn list_billing_students(
    pool: &DbPool,
    auth: &AuthContext,
    filter: &BillingStudentFilter,
    query: &ListQuery,
) -> Result<Page<BillingStudentView>, AppError> {
    if !auth.is_guardian() {
        auth.require_staff()?;
    }
    let status = filter
        .status
        .as_deref()
        .map(|s| s.parse::<BillingStatus>().map_err(AppError::invalid))
        .transpose()?;
    let scope = ItemScope {
        school_id: auth.school_filter(filter.school_id),
        guardian_id: auth.is_guardian().then_some(auth.user_id),
        student_id: filter.student_id,
        billing_id: filter.billing_id,
        status,
        due_before: filter.due_before,
    };

    let mut count = QueryBuilder::new(ITEM_COUNT);
    push_item_filters(&mut count, &scope);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new(ITEM_SELECT);
    push_item_filters(&mut select, &scope);
    let (limit, offset) = query.limit_offset();
    select
        .push(" ORDER BY bs.")
        .push(query.order_by(ITEM_SORTABLE, "due_date"))
        .push(" LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let items = select
        .build_query_as::<BillingStudentView>()
        .fetch_all(pool)
        .await?;

    Ok(Page::new(items, query, total))
}

/// `/students/{id}/billings`: installments of one student.
pub async fn list_student_billings(
    pool: &DbPool,
    auth: &AuthContext,
    student_id: Uuid,
    status: Option<String>,
    query: &ListQuery,
) -> Result<Page<BillingStudentView>, AppError> {
    student_service::get_student(pool, auth, student_id).await?;
    let filter = BillingStudentFilter {
        student_id: Some(student_id),
        status,
        ..Default::default()
    };
    list_billing_students(pool, auth, &filter, query).await
}

struct ItemScope {
    school_id: Option<Uuid>,
    guardian_id: Option<Uuid>,
    student_id: Option<Uuid>,
    billing_id: Option<Uuid>,
    status: Option<BillingStatus>,
    due_before: Option<chrono::NaiveDate>,
}

fn push_item_filters(builder: &mut QueryBuilder<'_, Postgres>, scope: &ItemScope) {
    builder.push(" WHERE bs.deleted_at IS NULL");
    if let Some(id) = scope.school_id {
        builder.push(" AND bs.school_id = ").push_bind(id);
    }
    if let Some(guardian) = scope.guardian_id {
        builder
            .push(" AND bs.student_id IN (SELECT student_id FROM student_guardians WHERE deleted_at IS NULL AND user_id = ")
            .push_bind(guardian)
            .push(")");
    }
    if let Some(id) = scope.student_id {
        builder.push(" AND bs.student_id = ").push_bind(id);
    }
    if let Some(id) = scope.billing_id {
        builder.push(" AND bs.billing_id = ").push_bind(id);
    }
    if let Some(status) = scope.status {
        builder.push(" AND bs.status = ").push_bind(status.as_str());
    }
    if let Some(date) = scope.due_before {
        builder.push(" AND bs.due_date <= ").push_bind(date);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;
    use crate::clients::gateway::mock::MockGateway;
    use crate::models::audit::Audit;
    use crate::state::test_support::{Fixture, db_state};

    fn detail(sequence: i32, amount: i64) -> BillingDetail {
        BillingDetail {
            id: Uuid::new_v4(),
            billing_id: Uuid::nil(),
            name: format!("Installment {sequence}"),
            amount,
            due_date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
            sequence,
            audit: Audit::fresh(None),
        }
    }

    fn input(amount: i64) -> BillingDetailInput {
        BillingDetailInput {
            name: "July".to_string(),
            amount,
            due_date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
        }
    }

    #[test]
    fn billing_numbers_are_zero_padded() {
        assert_eq!(format_billing_number("SDN01", 2025, 7), "BILL/SDN01/2025/00007");
        assert_eq!(
            format_billing_number("SMP2", 2026, 123_456),
            "BILL/SMP2/2026/123456"
        );
    }

    #[test]
    fn sequence_scope_is_per_school_code_and_year() {
        assert_ne!(
            billing_sequence_scope("SDN01", 2025),
            billing_sequence_scope("SDN01", 2026)
        );
        assert_ne!(
            billing_sequence_scope("SDN01", 2025),
            billing_sequence_scope("SDN02", 2025)
        );
    }

    #[test]
    fn schools_sharing_a_code_share_a_counter() {
        // A school re-created under a deleted school's code must not restart
        // at a number that is already taken
        assert_eq!(
            billing_sequence_scope("SDN01", 2025),
            billing_sequence_scope("SDN01", 2025)
        );
        assert!(billing_sequence_scope("SDN01", 2025).contains("SDN01"));
    }

    #[test]
    fn paid_or_pending_installments_block_deletion() {
        let statuses = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(!any_claimed(&[]));
        assert!(!any_claimed(&statuses(&["unpaid", "unpaid"])));
        assert!(any_claimed(&statuses(&["unpaid", "pending"])));
        assert!(any_claimed(&statuses(&["paid"])));
    }

    #[test]
    fn details_need_positive_amounts_unless_donation() {
        assert!(validate_details(&[input(350_000)], false).is_ok());
        assert!(validate_details(&[input(0)], false).is_err());
        assert!(validate_details(&[input(0)], true).is_ok());
        assert!(validate_details(&[input(-1)], true).is_err());
        assert!(validate_details(&[], true).is_err());
    }

    #[test]
    fn fan_out_creates_every_detail_for_every_student() {
        let details = vec![detail(1, 100), detail(2, 200)];
        let students = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let (planned, skipped) = plan_billing_students(&details, &students, &HashSet::new());

        assert_eq!(planned.len(), 6);
        assert_eq!(skipped, 0);
        assert_eq!(planned[0].student_id, students[0]);
        assert_eq!(planned[1].amount, 200);
        assert_eq!(planned[1].due_date, details[1].due_date);
    }

    #[test]
    fn fan_out_skips_existing_pairs_and_duplicate_students() {
        let details = vec![detail(1, 100), detail(2, 200)];
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let existing = HashSet::from([(details[0].id, a), (details[1].id, a), (details[0].id, b)]);
        let (planned, skipped) = plan_billing_students(&details, &[a, b, b], &existing);

        assert_eq!(skipped, 3);
        assert_eq!(
            planned,
            vec![NewBillingStudent {
                billing_detail_id: details[1].id,
                student_id: b,
                amount: 200,
                due_date: details[1].due_date,
            }]
        );
    }

    #[test]
    fn regenerating_is_a_no_op() {
        let details = vec![detail(1, 100)];
        let students = vec![Uuid::new_v4(), Uuid::new_v4()];
        let (first, _) = plan_billing_students(&details, &students, &HashSet::new());
        let existing: HashSet<_> = first
            .iter()
            .map(|p| (p.billing_detail_id, p.student_id))
            .collect();

        let (second, skipped) = plan_billing_students(&details, &students, &existing);
        assert!(second.is_empty());
        assert_eq!(skipped, 2);
    }

    fn july(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, day).unwrap()
    }

    #[tokio::test]
    async fn generate_counts_created_and_skipped_rows() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let pool = &state.pool;
        let fx = Fixture::seed(pool).await;
        fx.student(pool, "2001").await;
        fx.student(pool, "2002").await;
        let billing = fx.billing(pool, &[july(10), july(20)]).await;
        let all = || GenerateBillingRequest { student_ids: None };

        let first = generate_billing(pool, &fx.admin(), billing, all()).await.unwrap();
        assert_eq!(
            first,
            GenerateBillingResponse {
                students: 2,
                created: 4,
                skipped: 0
            }
        );

        let late = fx.student(pool, "2003").await;
        let second = generate_billing(pool, &fx.admin(), billing, all()).await.unwrap();
        assert_eq!(
            second,
            GenerateBillingResponse {
                students: 3,
                created: 2,
                skipped: 4
            }
        );
        assert_eq!(fx.installments(pool, late).await.len(), 2);

        let again = generate_billing(pool, &fx.admin(), billing, all()).await.unwrap();
        assert_eq!((again.created, again.skipped), (0, 6));
    }

    #[tokio::test]
    async fn billing_with_a_pending_installment_is_not_deleted() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let pool = &state.pool;
        let fx = Fixture::seed(pool).await;
        let student = fx.student(pool, "3001").await;
        let billing = fx.billing(pool, &[july(10)]).await;
        generate_billing(pool, &fx.admin(), billing, GenerateBillingRequest { student_ids: None })
            .await
            .unwrap();
        let installment = fx.installments(pool, student).await[0].0;
        sqlx::query("UPDATE billing_students SET status = 'pending' WHERE id = $1")
            .bind(installment)
            .execute(pool)
            .await
            .unwrap();

        let err = delete_billing(pool, &fx.admin(), billing).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(get_billing(pool, &fx.admin(), billing).await.is_ok());
        assert_eq!(fx.installments(pool, student).await.len(), 1);

        sqlx::query("UPDATE billing_students SET status = 'unpaid' WHERE id = $1")
            .bind(installment)
            .execute(pool)
            .await
            .unwrap();
        delete_billing(pool, &fx.admin(), billing).await.unwrap();
        assert!(matches!(
            get_billing(pool, &fx.admin(), billing).await,
            Err(AppError::NotFound(_))
        ));
        assert!(fx.installments(pool, student).await.is_empty());
    }
}
