//! Collection reports.

use sqlx::{Postgres, QueryBuilder};

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::billing::{BillingSummaryQuery, BillingSummaryRow};

/// Per billing: how much was billed, paid, is awaiting the gateway and is
/// still outstanding.
pub async fn billing_summary(
    pool: &DbPool,
    auth: &AuthContext,
    query: &BillingSummaryQuery,
) -> Result<Vec<BillingSummaryRow>, AppError> {
    auth.require_staff()?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        SELECT b.id AS billing_id,
               b.billing_number,
               b.name AS billing_name,
               COUNT(bs.id) AS total_items,
               COALESCE(SUM(bs.amount), 0)::BIGINT AS total_amount,
               COUNT(bs.id) FILTER (WHERE bs.status = 'paid') AS paid_items,
               COALESCE(SUM(bs.amount) FILTER (WHERE bs.status = 'paid'), 0)::BIGINT AS paid_amount,
               COALESCE(SUM(bs.amount) FILTER (WHERE bs.status = 'pending'), 0)::BIGINT AS pending_amount,
               COALESCE(SUM(bs.amount) FILTER (WHERE bs.status = 'unpaid'), 0)::BIGINT AS outstanding_amount
        FROM billings b
        LEFT JOIN billing_students bs ON bs.billing_id = b.id AND bs.deleted_at IS NULL
        WHERE b.deleted_at IS NULL
        "#,
    );
    if let Some(id) = auth.school_filter(query.school_id) {
        builder.push(" AND b.school_id = ").push_bind(id);
    }
    if let Some(id) = query.school_year_id {
        builder.push(" AND b.school_year_id = ").push_bind(id);
    }
    if let Some(id) = query.billing_id {
        builder.push(" AND b.id = ").push_bind(id);
    }
    builder.push(" GROUP BY b.id, b.billing_number, b.name ORDER BY b.billing_number");

    Ok(builder
        .build_query_as::<BillingSummaryRow>()
        .fetch_all(pool)
        .await?)
}
