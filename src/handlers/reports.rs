use axum::{
    Extension, Json,
    extract::{Query, State},
};

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::billing::{BillingSummaryQuery, BillingSummaryRow},
    services::report_service,
};

/// `GET /api/v1/reports/billing-summary?school_year_id=&billing_id=`
///
/// One row per billing with billed, paid, pending and outstanding totals.
pub async fn billing_summary(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<BillingSummaryQuery>,
) -> Result<Json<Vec<BillingSummaryRow>>, AppError> {
    Ok(Json(report_service::billing_summary(&pool, &auth, &query).await?))
}
