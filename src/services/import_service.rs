//! Bulk student import with guardian de-duplication.
//!
//! Import runs in two steps. [`plan_student_import`] is pure: it validates
//! rows against lookups loaded up front and decides which students to
//! create or update, which guardians to create or reuse and which links to
//! add. [`import_students`] loads the lookups, applies the plan in one
//! database transaction and then sends verification links to new guardians.

use std::collections::{HashMap, HashSet};

use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::role;
use crate::models::student::{
    ImportRowError, ImportStudentRow, ImportStudentsRequest, ImportSummary,
};
use crate::services::auth_service::{self, VerificationTarget};
use crate::services::student_service::{normalize_nis, normalize_relation};
use crate::services::user_service;
use crate::services::validation::{
    normalize_email, normalize_gender, normalize_phone, optional_trimmed, required,
};
use crate::state::AppState;

/// Existing records the planner resolves rows against.
#[derive(Debug, Default)]
pub struct ImportLookup {
    /// Lower-cased class name → class id, for the import's school year
    pub classes: HashMap<String, Uuid>,
    /// NIS → student id
    pub students: HashMap<String, Uuid>,
    /// Lower-cased email → guardian user id
    pub guardians_by_email: HashMap<String, Uuid>,
    /// Normalized phone → guardian user id
    pub guardians_by_phone: HashMap<String, Uuid>,
    /// Emails held by users that are not guardians of this school
    pub unavailable_emails: HashSet<String>,
    /// Existing (student id, guardian user id) links
    pub links: HashSet<(Uuid, Uuid)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStudent {
    pub row: usize,
    pub nis: String,
    pub name: String,
    pub class_id: Option<Uuid>,
    pub gender: Option<String>,
    /// Set when the NIS is already registered; the student is updated
    pub existing_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedGuardian {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Set when the guardian already exists as a user
    pub existing_id: Option<Uuid>,
}

/// Link between `students[student]` and `guardians[guardian]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub student: usize,
    pub guardian: usize,
    pub relation: String,
}

#[derive(Debug, Default)]
pub struct ImportPlan {
    pub students: Vec<PlannedStudent>,
    pub guardians: Vec<PlannedGuardian>,
    pub links: Vec<PlannedLink>,
    pub errors: Vec<ImportRowError>,
}

struct ValidRow {
    nis: String,
    name: String,
    class_id: Option<Uuid>,
    gender: Option<String>,
    guardian: Option<GuardianInput>,
}

struct GuardianInput {
    full_name: String,
    email: Option<String>,
    phone: Option<String>,
    relation: String,
}

fn validate_row(row: &ImportStudentRow, lookup: &ImportLookup) -> Result<ValidRow, AppError> {
    let nis = normalize_nis(&row.nis)?;
    let name = required(&row.name, "name")?;
    let gender = normalize_gender(row.gender.clone())?;
    let class_id = match optional_trimmed(row.class_name.clone()) {
        Some(class_name) => Some(
            *lookup
                .classes
                .get(&class_name.to_lowercase())
                .ok_or_else(|| AppError::invalid(format!("class '{class_name}' not found")))?,
        ),
        None => None,
    };

    let guardian_name = optional_trimmed(row.guardian_name.clone());
    let email = optional_trimmed(row.guardian_email.clone())
        .map(|e| normalize_email(&e))
        .transpose()?;
    let phone = optional_trimmed(row.guardian_phone.clone())
        .map(|p| normalize_phone(&p))
        .transpose()?;

    let guardian = match (guardian_name, email, phone) {
        (None, None, None) => None,
        (Some(_), None, None) => {
            return Err(AppError::invalid("guardian needs an email or a phone number"));
        }
        (None, _, _) => return Err(AppError::invalid("guardian_name is required")),
        (Some(full_name), email, phone) => Some(GuardianInput {
            full_name,
            email,
            phone,
            relation: normalize_relation(row.relation.as_deref())?,
        }),
    };

    Ok(ValidRow {
        nis,
        name,
        class_id,
        gender,
        guardian,
    })
}

/// Tracks guardians already placed in the plan, keyed the same way as the lookup.
#[derive(Default)]
struct GuardianIndex {
    by_email: HashMap<String, usize>,
    by_phone: HashMap<String, usize>,
}

enum Found {
    Planned(usize),
    Existing(Uuid),
    Nothing,
}

impl Found {
    fn from_lookup(id: Option<&Uuid>) -> Self {
        id.map_or(Found::Nothing, |id| Found::Existing(*id))
    }
}

fn resolve_guardian(
    input: &GuardianInput,
    plan: &mut ImportPlan,
    index: &mut GuardianIndex,
    lookup: &ImportLookup,
) -> Result<usize, AppError> {
    // Email identifies a guardian when present; phone only as a fallback
    let found = match (&input.email, &input.phone) {
        (Some(email), _) => {
            if lookup.unavailable_emails.contains(email) {
                return Err(AppError::invalid(format!(
                    "email '{email}' belongs to a user who is not a guardian of this school"
                )));
            }
            match index.by_email.get(email) {
                Some(idx) => Found::Planned(*idx),
                None => Found::from_lookup(lookup.guardians_by_email.get(email)),
            }
        }
        (None, Some(phone)) => match index.by_phone.get(phone) {
            Some(idx) => Found::Planned(*idx),
            None => Found::from_lookup(lookup.guardians_by_phone.get(phone)),
        },
        (None, None) => Found::Nothing,
    };

    let existing_id = match found {
        Found::Planned(idx) => return Ok(idx),
        Found::Existing(user_id) => {
            // Already placed under another key?
            if let Some(idx) = plan
                .guardians
                .iter()
                .position(|g| g.existing_id == Some(user_id))
            {
                return Ok(idx);
            }
            Some(user_id)
        }
        Found::Nothing => None,
    };

    let idx = plan.guardians.len();
    plan.guardians.push(PlannedGuardian {
        full_name: input.full_name.clone(),
        email: input.email.clone(),
        phone: input.phone.clone(),
        existing_id,
    });
    if let Some(email) = &input.email {
        index.by_email.insert(email.clone(), idx);
    }
    if let Some(phone) = &input.phone {
        index.by_phone.entry(phone.clone()).or_insert(idx);
    }
    Ok(idx)
}

/// Decide what an import does without touching the database.
///
/// Rows are numbered from 1. A rejected row contributes nothing to the plan.
pub fn plan_student_import(rows: &[ImportStudentRow], lookup: &ImportLookup) -> ImportPlan {
    let mut plan = ImportPlan::default();
    let mut seen_nis: HashMap<String, usize> = HashMap::new();
    let mut guardians = GuardianIndex::default();
    let mut planned_links: HashSet<(usize, usize)> = HashSet::new();

    for (i, raw) in rows.iter().enumerate() {
        let row = i + 1;
        let reject = |plan: &mut ImportPlan, message: String| {
            plan.errors.push(ImportRowError { row, message });
        };

        let valid = match validate_row(raw, lookup) {
            Ok(valid) => valid,
            Err(e) => {
                reject(&mut plan, e.to_string());
                continue;
            }
        };
        if let Some(first) = seen_nis.get(&valid.nis) {
            reject(
                &mut plan,
                format!("duplicate NIS '{}' (first seen in row {first})", valid.nis),
            );
            continue;
        }

        let guardian = match valid
            .guardian
            .as_ref()
            .map(|g| resolve_guardian(g, &mut plan, &mut guardians, lookup).map(|idx| (idx, g)))
            .transpose()
        {
            Ok(guardian) => guardian,
            Err(e) => {
                reject(&mut plan, e.to_string());
                continue;
            }
        };

        seen_nis.insert(valid.nis.clone(), row);
        let student_idx = plan.students.len();
        let existing_student = lookup.students.get(&valid.nis).copied();
        plan.students.push(PlannedStudent {
            row,
            nis: valid.nis,
            name: valid.name,
            class_id: valid.class_id,
            gender: valid.gender,
            existing_id: existing_student,
        });

        if let Some((guardian_idx, input)) = guardian {
            let already_linked = match (existing_student, plan.guardians[guardian_idx].existing_id) {
                (Some(student_id), Some(user_id)) => lookup.links.contains(&(student_id, user_id)),
                _ => false,
            };
            if !already_linked && planned_links.insert((student_idx, guardian_idx)) {
                plan.links.push(PlannedLink {
                    student: student_idx,
                    guardian: guardian_idx,
                    relation: input.relation.clone(),
                });
            }
        }
    }

    plan
}

/// `POST /students/import`: create or update students and their guardians.
pub async fn import_students(
    state: &AppState,
    auth: &AuthContext,
    request: ImportStudentsRequest,
) -> Result<ImportSummary, AppError> {
    auth.require_admin()?;
    if request.rows.is_empty() {
        return Err(AppError::invalid("rows must not be empty"));
    }
    let pool = &state.pool;
    let school_id = auth.school_scope(request.school_id)?;

    let year_id: Option<Uuid> = match request.school_year_id {
        Some(id) => Some(
            sqlx::query_scalar(
                "SELECT id FROM school_years WHERE id = $1 AND school_id = $2 AND deleted_at IS NULL",
            )
            .bind(id)
            .bind(school_id)
            .fetch_optional(pool)
            .await?
            .ok_or(AppError::NotFound("School year"))?,
        ),
        None => {
            sqlx::query_scalar(
                "SELECT id FROM school_years WHERE school_id = $1 AND is_active AND deleted_at IS NULL",
            )
            .bind(school_id)
            .fetch_optional(pool)
            .await?
        }
    };

    let lookup = load_lookup(pool, school_id, year_id, &request.rows).await?;
    let plan = plan_student_import(&request.rows, &lookup);

    let guardian_role = user_service::role_id_by_code(pool, role::GUARDIAN).await?;
    let mut summary = ImportSummary {
        errors: plan.errors.clone(),
        ..Default::default()
    };

    let mut tx = pool.begin().await?;

    let mut student_ids = Vec::with_capacity(plan.students.len());
    for student in &plan.students {
        let id = match student.existing_id {
            Some(id) => {
                sqlx::query(
                    r#"
                    UPDATE students
                    SET name = $2,
                        school_class_id = COALESCE($3, school_class_id),
                        gender = COALESCE($4, gender),
                        updated_by = $5,
                        updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&student.name)
                .bind(student.class_id)
                .bind(&student.gender)
                .bind(auth.user_id)
                .execute(&mut *tx)
                .await?;
                summary.students_updated += 1;
                id
            }
            None => {
                let id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO students (school_id, school_class_id, nis, name, gender, created_by, updated_by)
                    VALUES ($1, $2, $3, $4, $5, $6, $6)
                    RETURNING id
                    "#,
                )
                .bind(school_id)
                .bind(student.class_id)
                .bind(&student.nis)
                .bind(&student.name)
                .bind(&student.gender)
                .bind(auth.user_id)
                .fetch_one(&mut *tx)
                .await?;
                summary.students_created += 1;
                id
            }
        };
        student_ids.push(id);
    }

    let mut guardian_ids = Vec::with_capacity(plan.guardians.len());
    let mut verify = Vec::new();
    for guardian in &plan.guardians {
        let id = match guardian.existing_id {
            Some(id) => id,
            None => {
                let username = free_username(&mut *tx, guardian).await?;
                let (password, _) = auth_service::generate_verification_token();
                let id: Uuid = sqlx::query_scalar(
                    r#"
                    INSERT INTO users (school_id, role_id, username, email, full_name, phone, password_hash, created_by, updated_by)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
                    RETURNING id
                    "#,
                )
                .bind(school_id)
                .bind(guardian_role)
                .bind(&username)
                .bind(&guardian.email)
                .bind(&guardian.full_name)
                .bind(&guardian.phone)
                .bind(auth_service::hash_password(&password)?)
                .bind(auth.user_id)
                .fetch_one(&mut *tx)
                .await?;
                summary.guardians_created += 1;
                if let Some(email) = &guardian.email {
                    verify.push(VerificationTarget {
                        user_id: id,
                        email: email.clone(),
                        full_name: guardian.full_name.clone(),
                    });
                }
                id
            }
        };
        guardian_ids.push(id);
    }

    if !plan.links.is_empty() {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO student_guardians (student_id, user_id, relation, created_by, updated_by) ",
        );
        builder.push_values(&plan.links, |mut row, link| {
            row.push_bind(student_ids[link.student])
                .push_bind(guardian_ids[link.guardian])
                .push_bind(&link.relation)
                .push_bind(auth.user_id)
                .push_bind(auth.user_id);
        });
        // A link made by a concurrent import or attach since the lookup is kept
        builder.push(" ON CONFLICT (student_id, user_id) WHERE deleted_at IS NULL DO NOTHING");
        summary.guardians_linked = builder.build().execute(&mut *tx).await?.rows_affected() as usize;
    }

    tx.commit().await?;

    let verifications = verify.len();
    if verifications > 0 {
        auth_service::issue_verifications(pool, &state.config, &state.email, verify).await?;
    }

    tracing::info!(
        %school_id,
        created = summary.students_created,
        updated = summary.students_updated,
        guardians = summary.guardians_created,
        links = summary.guardians_linked,
        rejected = summary.errors.len(),
        verifications,
        "student import finished"
    );
    Ok(summary)
}

async fn load_lookup(
    pool: &DbPool,
    school_id: Uuid,
    year_id: Option<Uuid>,
    rows: &[ImportStudentRow],
) -> Result<ImportLookup, AppError> {
    let mut lookup = ImportLookup::default();

    if let Some(year_id) = year_id {
        let classes: Vec<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT id, name FROM school_classes
            WHERE school_id = $1 AND school_year_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(school_id)
        .bind(year_id)
        .fetch_all(pool)
        .await?;
        lookup.classes = classes
            .into_iter()
            .map(|(id, name)| (name.to_lowercase(), id))
            .collect();
    }

    let nis: Vec<String> = rows.iter().map(|r| r.nis.trim().to_string()).collect();
    let students: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT id, nis FROM students WHERE school_id = $1 AND nis = ANY($2) AND deleted_at IS NULL",
    )
    .bind(school_id)
    .bind(&nis)
    .fetch_all(pool)
    .await?;
    lookup.students = students.into_iter().map(|(id, nis)| (nis, id)).collect();

    let emails: Vec<String> = rows
        .iter()
        .filter_map(|r| r.guardian_email.as_deref())
        .filter_map(|e| normalize_email(e).ok())
        .collect();
    let by_email: Vec<(Uuid, String, Option<Uuid>, String)> = sqlx::query_as(
        r#"
        SELECT u.id, LOWER(u.email), u.school_id, r.code
        FROM users u JOIN roles r ON r.id = u.role_id
        WHERE LOWER(u.email) = ANY($1) AND u.deleted_at IS NULL
        "#,
    )
    .bind(&emails)
    .fetch_all(pool)
    .await?;
    for (id, email, user_school, code) in by_email {
        if user_school == Some(school_id) && code == role::GUARDIAN {
            lookup.guardians_by_email.insert(email, id);
        } else {
            lookup.unavailable_emails.insert(email);
        }
    }

    let phones: Vec<String> = rows
        .iter()
        .filter_map(|r| r.guardian_phone.as_deref())
        .filter_map(|p| normalize_phone(p).ok())
        .collect();
    let by_phone: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT u.id, u.phone
        FROM users u JOIN roles r ON r.id = u.role_id
        WHERE u.phone = ANY($1) AND u.school_id = $2 AND r.code = $3 AND u.deleted_at IS NULL
        ORDER BY u.created_at
        "#,
    )
    .bind(&phones)
    .bind(school_id)
    .bind(role::GUARDIAN)
    .fetch_all(pool)
    .await?;
    for (id, phone) in by_phone {
        lookup.guardians_by_phone.entry(phone).or_insert(id);
    }

    let student_ids: Vec<Uuid> = lookup.students.values().copied().collect();
    if !student_ids.is_empty() {
        let links: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT student_id, user_id FROM student_guardians WHERE student_id = ANY($1) AND deleted_at IS NULL",
        )
        .bind(&student_ids)
        .fetch_all(pool)
        .await?;
        lookup.links = links.into_iter().collect();
    }

    Ok(lookup)
}

/// Username for a new guardian: the email, else the phone digits, with a
/// numeric suffix if taken.
async fn free_username(
    conn: &mut PgConnection,
    guardian: &PlannedGuardian,
) -> Result<String, AppError> {
    let base = guardian
        .email
        .clone()
        .or_else(|| {
            guardian
                .phone
                .as_deref()
                .map(|p| p.trim_start_matches('+').to_string())
        })
        .ok_or_else(|| AppError::Internal("guardian without email or phone".to_string()))?;

    let mut candidate = base.clone();
    for suffix in 1.. {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 AND deleted_at IS NULL)",
        )
        .bind(&candidate)
        .fetch_one(&mut *conn)
        .await?;
        if !taken {
            break;
        }
        candidate = format!("{base}-{suffix}");
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::gateway::mock::MockGateway;
    use crate::state::test_support::{Fixture, db_state};

    fn row(nis: &str, name: &str) -> ImportStudentRow {
        ImportStudentRow {
            nis: nis.to_string(),
            name: name.to_string(),
            class_name: None,
            gender: None,
            guardian_name: None,
            guardian_email: None,
            guardian_phone: None,
            relation: None,
        }
    }

    fn with_guardian(
        mut r: ImportStudentRow,
        name: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> ImportStudentRow {
        r.guardian_name = Some(name.to_string());
        r.guardian_email = email.map(str::to_string);
        r.guardian_phone = phone.map(str::to_string);
        r
    }

    #[test]
    fn first_nis_wins_and_later_duplicates_are_reported() {
        let rows = vec![row("001", "Ani"), row("002", "Budi"), row("001", "Ani Copy")];
        let plan = plan_student_import(&rows, &ImportLookup::default());

        assert_eq!(plan.students.len(), 2);
        assert_eq!(plan.students[0].name, "Ani");
        assert_eq!(plan.errors.len(), 1);
        assert_eq!(plan.errors[0].row, 3);
        assert!(plan.errors[0].message.contains("first seen in row 1"));
    }

    #[test]
    fn invalid_rows_are_skipped_with_row_numbers() {
        let mut bad_class = row("003", "Citra");
        bad_class.class_name = Some("7Z".to_string());
        let rows = vec![row("", "Nameless"), row("002", "Budi"), bad_class];
        let plan = plan_student_import(&rows, &ImportLookup::default());

        assert_eq!(plan.students.len(), 1);
        let rejected: Vec<usize> = plan.errors.iter().map(|e| e.row).collect();
        assert_eq!(rejected, vec![1, 3]);
        assert!(plan.errors[1].message.contains("7Z"));
    }

    #[test]
    fn existing_nis_becomes_an_update() {
        let existing = Uuid::new_v4();
        let class = Uuid::new_v4();
        let lookup = ImportLookup {
            students: HashMap::from([("001".to_string(), existing)]),
            classes: HashMap::from([("7a".to_string(), class)]),
            ..Default::default()
        };
        let mut r = row("001", "Ani Updated");
        r.class_name = Some("7A".to_string());
        let plan = plan_student_import(&[r], &lookup);

        assert_eq!(plan.students[0].existing_id, Some(existing));
        assert_eq!(plan.students[0].class_id, Some(class));
    }

    #[test]
    fn guardians_are_shared_by_email_case_insensitively() {
        let rows = vec![
            with_guardian(row("001", "Ani"), "Sri", Some("Sri@Mail.com"), None),
            with_guardian(row("002", "Budi"), "Sri W.", Some("sri@mail.com"), None),
        ];
        let plan = plan_student_import(&rows, &ImportLookup::default());

        assert_eq!(plan.guardians.len(), 1);
        assert_eq!(plan.guardians[0].full_name, "Sri");
        assert_eq!(plan.links.len(), 2);
        assert!(plan.links.iter().all(|l| l.guardian == 0));
    }

    #[test]
    fn phone_is_the_fallback_key() {
        let rows = vec![
            with_guardian(row("001", "Ani"), "Sri", Some("sri@mail.com"), Some("0812-3456-7890")),
            with_guardian(row("002", "Budi"), "Sri", None, Some("081234567890")),
            with_guardian(row("003", "Citra"), "Joko", None, Some("081200000000")),
        ];
        let plan = plan_student_import(&rows, &ImportLookup::default());

        assert_eq!(plan.guardians.len(), 2);
        assert_eq!(plan.links[1].guardian, 0);
        assert_eq!(plan.links[2].guardian, 1);
    }

    #[test]
    fn existing_guardians_and_links_are_reused() {
        let student = Uuid::new_v4();
        let guardian = Uuid::new_v4();
        let lookup = ImportLookup {
            students: HashMap::from([("001".to_string(), student)]),
            guardians_by_email: HashMap::from([("sri@mail.com".to_string(), guardian)]),
            links: HashSet::from([(student, guardian)]),
            ..Default::default()
        };
        let rows = vec![
            with_guardian(row("001", "Ani"), "Sri", Some("sri@mail.com"), None),
            with_guardian(row("002", "Budi"), "Sri", Some("sri@mail.com"), None),
        ];
        let plan = plan_student_import(&rows, &lookup);

        assert_eq!(plan.guardians.len(), 1);
        assert_eq!(plan.guardians[0].existing_id, Some(guardian));
        // Only the new student gets a link; the existing pair is kept as is
        assert_eq!(plan.links.len(), 1);
        assert_eq!(plan.links[0].student, 1);
    }

    #[test]
    fn email_of_another_users_rejects_the_row() {
        let lookup = ImportLookup {
            unavailable_emails: HashSet::from(["admin@school.id".to_string()]),
            ..Default::default()
        };
        let rows = vec![with_guardian(row("001", "Ani"), "Sri", Some("admin@school.id"), None)];
        let plan = plan_student_import(&rows, &lookup);

        assert!(plan.students.is_empty());
        assert!(plan.guardians.is_empty());
        assert_eq!(plan.errors[0].row, 1);
    }

    #[test]
    fn guardian_without_contact_is_rejected() {
        let rows = vec![with_guardian(row("001", "Ani"), "Sri", None, None)];
        let plan = plan_student_import(&rows, &ImportLookup::default());
        assert!(plan.students.is_empty());
        assert_eq!(plan.errors.len(), 1);
    }

    #[test]
    fn rejected_row_does_not_register_its_guardian() {
        let rows = vec![
            with_guardian(row("001", "Ani"), "Sri", Some("sri@mail.com"), None),
            with_guardian(row("001", "Ani Dup"), "Joko", Some("joko@mail.com"), None),
        ];
        let plan = plan_student_import(&rows, &ImportLookup::default());
        assert_eq!(plan.guardians.len(), 1);
        assert_eq!(plan.links.len(), 1);
    }

    #[tokio::test]
    async fn reimport_updates_students_and_reuses_guardians() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let pool = &state.pool;
        let fx = Fixture::seed(pool).await;
        let existing = fx.student(pool, "7001").await;
        let guardian = fx.guardian(pool, existing).await;
        let guardian_email: String = sqlx::query_scalar("SELECT email FROM users WHERE id = $1")
            .bind(guardian)
            .fetch_one(pool)
            .await
            .unwrap();
        let new_email = format!("parent-{}@example.com", Uuid::new_v4().simple());

        let mut renamed = with_guardian(
            row("7001", "Ani Renamed"),
            "Guardian",
            Some(&guardian_email),
            None,
        );
        renamed.class_name = Some("1A".to_string());
        let rows = vec![
            renamed,
            with_guardian(row("7002", "Budi"), "Parent", Some(&new_email), None),
        ];
        let request = || ImportStudentsRequest {
            school_id: Some(fx.school_id),
            school_year_id: Some(fx.year_id),
            rows: rows.clone(),
        };

        let first = import_students(&state, &fx.admin(), request()).await.unwrap();
        assert!(first.errors.is_empty());
        assert_eq!((first.students_created, first.students_updated), (1, 1));
        assert_eq!(first.guardians_created, 1);
        // The existing pair is already linked
        assert_eq!(first.guardians_linked, 1);

        let name: String = sqlx::query_scalar("SELECT name FROM students WHERE id = $1")
            .bind(existing)
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(name, "Ani Renamed");

        let second = import_students(&state, &fx.admin(), request()).await.unwrap();
        assert_eq!((second.students_created, second.students_updated), (0, 2));
        assert_eq!((second.guardians_created, second.guardians_linked), (0, 0));

        let links: Vec<(String, Uuid)> = sqlx::query_as(
            r#"
            SELECT s.nis, sg.user_id FROM student_guardians sg
            JOIN students s ON s.id = sg.student_id
            WHERE s.school_id = $1 AND sg.deleted_at IS NULL
            ORDER BY s.nis
            "#,
        )
        .bind(fx.school_id)
        .fetch_all(pool)
        .await
        .unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0], ("7001".to_string(), guardian));
        assert_ne!(links[1].1, guardian);
    }
}
