//! Shared application state handed to every handler.

use std::sync::Arc;

use axum::extract::FromRef;

use crate::clients::gateway::PaymentGateway;
use crate::clients::push::PushSender;
use crate::config::Config;
use crate::db::DbPool;
use crate::services::email_dispatcher::EmailDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<Config>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub push: Arc<dyn PushSender>,
    pub email: EmailDispatcher,
}

/// Lets handlers that only touch the database keep extracting `State<DbPool>`.
impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use uuid::Uuid;

    use super::AppState;
    use crate::clients::gateway::mock::MockGateway;
    use crate::clients::mailer::mock::MockMailer;
    use crate::clients::push::mock::MockPushSender;
    use crate::config::{Config, test_config};
    use crate::db::DbPool;
    use crate::middleware::auth::{AuthContext, context};
    use crate::models::billing::{BillingDetailInput, CreateBillingRequest};
    use crate::models::role;
    use crate::services::billing_service;
    use crate::services::email_dispatcher::EmailDispatcher;

    /// State over a lazy pool: nothing connects until a query runs, so
    /// endpoints that answer before touching the database can be tested.
    pub fn lazy_state() -> AppState {
        let config = test_config();
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        with_pool(pool, config, Arc::new(MockGateway::default()))
    }

    fn with_pool(pool: DbPool, config: Config, gateway: Arc<MockGateway>) -> AppState {
        let (email, _workers) = EmailDispatcher::start(
            Arc::new(MockMailer::default()),
            1,
            Duration::ZERO,
            16,
        );
        AppState {
            pool,
            config: Arc::new(config),
            gateway,
            push: Arc::new(MockPushSender::default()),
            email,
        }
    }

    /// State over a migrated database taken from `DATABASE_URL`.
    ///
    /// Returns `None` when the variable is missing so database tests skip
    /// instead of failing on machines without Postgres.
    pub async fn db_state(gateway: Arc<MockGateway>) -> Option<AppState> {
        dotenvy::dotenv().ok();
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL missing; skipping database test");
            return None;
        };
        // Invoice numbers are reserved on a second connection while the
        // payment transaction holds the first
        let pool = crate::db::create_pool(&database_url, 4)
            .await
            .expect("connect to DATABASE_URL");
        crate::db::run_migrations(&pool).await.expect("migrations");
        let config = Config {
            database_url,
            ..test_config()
        };
        Some(with_pool(pool, config, gateway))
    }

    /// Same database, different gateway.
    pub fn with_gateway(state: &AppState, gateway: Arc<MockGateway>) -> AppState {
        AppState {
            gateway,
            ..state.clone()
        }
    }

    pub fn super_admin() -> AuthContext {
        context(role::SUPER_ADMIN, None)
    }

    /// One school with a year, grade, class, billing type and payment method.
    /// Codes are random so runs never collide on a shared database.
    pub struct Fixture {
        pub school_id: Uuid,
        pub school_code: String,
        pub year_id: Uuid,
        pub class_id: Uuid,
        pub billing_type_id: Uuid,
        pub method_id: Uuid,
    }

    pub const ADMIN_FEE: i64 = 5_000;

    fn unique_code(prefix: &str) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{prefix}{}", &id[..10]).to_ascii_uppercase()
    }

    impl Fixture {
        pub async fn seed(pool: &DbPool) -> Fixture {
            let school_code = unique_code("T");
            let school_id: Uuid = sqlx::query_scalar(
                "INSERT INTO schools (code, name) VALUES ($1, $2) RETURNING id",
            )
            .bind(&school_code)
            .bind(format!("School {school_code}"))
            .fetch_one(pool)
            .await
            .expect("school");
            let year_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO school_years (school_id, name, start_date, end_date, is_active)
                VALUES ($1, '2025/2026', '2025-07-01', '2026-06-30', true)
                RETURNING id
                "#,
            )
            .bind(school_id)
            .fetch_one(pool)
            .await
            .expect("school year");
            let grade_id: Uuid = sqlx::query_scalar(
                "INSERT INTO school_grades (school_id, name, level) VALUES ($1, 'Grade 1', 1) RETURNING id",
            )
            .bind(school_id)
            .fetch_one(pool)
            .await
            .expect("grade");
            let class_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO school_classes (school_id, school_grade_id, school_year_id, name)
                VALUES ($1, $2, $3, '1A')
                RETURNING id
                "#,
            )
            .bind(school_id)
            .bind(grade_id)
            .bind(year_id)
            .fetch_one(pool)
            .await
            .expect("class");
            let billing_type_id: Uuid = sqlx::query_scalar(
                "INSERT INTO billing_types (school_id, code, name) VALUES ($1, 'SPP', 'Tuition') RETURNING id",
            )
            .bind(school_id)
            .fetch_one(pool)
            .await
            .expect("billing type");
            let method_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO payment_methods (school_id, name, channel, bank_code, admin_fee)
                VALUES ($1, 'BCA Virtual Account', 'bank_transfer', 'BCA', $2)
                RETURNING id
                "#,
            )
            .bind(school_id)
            .bind(ADMIN_FEE)
            .fetch_one(pool)
            .await
            .expect("payment method");

            Fixture {
                school_id,
                school_code,
                year_id,
                class_id,
                billing_type_id,
                method_id,
            }
        }

        pub fn admin(&self) -> AuthContext {
            context(role::SCHOOL_ADMIN, Some(self.school_id))
        }

        pub async fn student(&self, pool: &DbPool, nis: &str) -> Uuid {
            sqlx::query_scalar(
                r#"
                INSERT INTO students (school_id, school_class_id, nis, name)
                VALUES ($1, $2, $3, $4)
                RETURNING id
                "#,
            )
            .bind(self.school_id)
            .bind(self.class_id)
            .bind(nis)
            .bind(format!("Student {nis}"))
            .fetch_one(pool)
            .await
            .expect("student")
        }

        /// A guardian user linked to `student_id`.
        pub async fn guardian(&self, pool: &DbPool, student_id: Uuid) -> Uuid {
            let username = unique_code("g").to_ascii_lowercase();
            let user_id: Uuid = sqlx::query_scalar(
                r#"
                INSERT INTO users (school_id, role_id, username, email, full_name, password_hash)
                SELECT $1, id, $2, $3, 'Guardian', 'unused' FROM roles WHERE code = 'guardian'
                RETURNING id
                "#,
            )
            .bind(self.school_id)
            .bind(&username)
            .bind(format!("{username}@example.com"))
            .fetch_one(pool)
            .await
            .expect("guardian");
            sqlx::query("INSERT INTO student_guardians (student_id, user_id) VALUES ($1, $2)")
                .bind(student_id)
                .bind(user_id)
                .execute(pool)
                .await
                .expect("guardian link");
            user_id
        }

        /// A billing for the fixture class with one installment per due date.
        pub async fn billing(&self, pool: &DbPool, due_dates: &[NaiveDate]) -> Uuid {
            let request = CreateBillingRequest {
                school_id: Some(self.school_id),
                billing_type_id: self.billing_type_id,
                school_year_id: self.year_id,
                school_grade_id: None,
                school_class_id: Some(self.class_id),
                code: unique_code("B"),
                name: "SPP 2025/2026".to_string(),
                description: None,
                is_donation: false,
                details: due_dates
                    .iter()
                    .enumerate()
                    .map(|(i, &due_date)| BillingDetailInput {
                        name: format!("Installment {}", i + 1),
                        amount: 350_000,
                        due_date,
                    })
                    .collect(),
            };
            billing_service::create_billing(pool, &self.admin(), request)
                .await
                .expect("billing")
                .billing
                .id
        }

        /// Installments of `student_id` in due date order.
        pub async fn installments(&self, pool: &DbPool, student_id: Uuid) -> Vec<(Uuid, String)> {
            sqlx::query_as(
                r#"
                SELECT id, status FROM billing_students
                WHERE student_id = $1 AND deleted_at IS NULL
                ORDER BY due_date
                "#,
            )
            .bind(student_id)
            .fetch_all(pool)
            .await
            .expect("installments")
        }
    }
}
