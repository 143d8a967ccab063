//! Database connection pool, migrations and document sequences.
//!
//! This module provides utilities for:
//! - Creating and managing a PostgreSQL connection pool
//! - Running database migrations automatically
//! - Handing out per-scope sequence numbers

use sqlx::{PgConnection, Pool, Postgres};

/// Type alias for PostgreSQL connection pool.
pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// A connection pool maintains multiple database connections that can be reused across HTTP
/// requests, which is much more efficient than opening a new connection for each request.
///
/// # Errors
///
/// Returns an error if:
/// - Database connection string is invalid
/// - Cannot connect to PostgreSQL server
/// - Database authentication fails
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations from the `migrations/` directory.
///
/// Migrations are tracked in the `_sqlx_migrations` table, so each migration runs only once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    // The macro reads migrations at compile time from ./migrations directory
    sqlx::migrate!("./migrations").run(pool).await
}

/// Increment and return the counter for `scope`.
///
/// Inside a transaction the number is only consumed when it commits; on a
/// plain connection it is consumed at once. The row lock taken by the upsert
/// serializes concurrent callers on the same scope.
pub async fn next_sequence(conn: &mut PgConnection, scope: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        INSERT INTO document_sequences (scope, last_value)
        VALUES ($1, 1)
        ON CONFLICT (scope) DO UPDATE
        SET last_value = document_sequences.last_value + 1,
            updated_at = NOW()
        RETURNING last_value
        "#,
    )
    .bind(scope)
    .fetch_one(conn)
    .await
}
