//! Payment transactions and gateway reconciliation.
//!
//! This service handles:
//! - Creating a transaction over unpaid billing students and charging it at the gateway
//! - Reading and listing transactions with tenant and guardian scoping
//! - Applying gateway statuses (webhook, manual sync, background poll)
//!
//! # Atomicity Guarantees
//!
//! A transaction, its items and the `pending` mark on its billing students are
//! written in one database transaction. The gateway charge is requested before
//! commit; if it fails everything rolls back and the caller gets a 502. The
//! invoice number is reserved outside that transaction and stays used.
//!
//! A status change and the matching billing student update also commit
//! together, and only a `pending` transaction can change, so replayed or
//! out-of-order notifications never undo a payment.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::clients::gateway::{
    ChargeItem, ChargeRequest, GatewayError, parse_gross_amount, verify_notification,
};
use crate::db::{self, DbPool};
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::billing::BillingStatus;
use crate::models::payment_method::PaymentMethod;
use crate::models::transaction::{
    CreateTransactionRequest, GatewayNotification, ReconcileOutcome, TransactionBilling,
    TransactionFilter, TransactionItem, TransactionResponse, TransactionStatus,
};
use crate::pagination::{ListQuery, Page};
use crate::services::{notification_service, payment_method_service, school_service, student_service};
use crate::state::AppState;

const SORTABLE: &[&str] = &["invoice_number", "total_amount", "status", "created_at"];

pub fn format_invoice_number(school_code: &str, date: NaiveDate, seq: i64) -> String {
    format!("INV/{school_code}/{}/{seq:05}", date.format("%Y%m%d"))
}

fn invoice_sequence_scope(school_code: &str, date: NaiveDate) -> String {
    format!("invoice:{school_code}:{}", date.format("%Y%m%d"))
}

/// Take the next invoice number in its own committed statement.
///
/// A number is never handed back, even when the charge that used it rolls
/// back: the gateway may already know that order id.
async fn reserve_invoice_number(pool: &DbPool, school_id: Uuid) -> Result<String, AppError> {
    let today = Utc::now().date_naive();
    let mut conn = pool.acquire().await?;
    let school_code = school_service::school_code(&mut *conn, school_id).await?;
    let seq = db::next_sequence(&mut *conn, &invoice_sequence_scope(&school_code, today)).await?;
    Ok(format_invoice_number(&school_code, today, seq))
}

/// Map a gateway `transaction_status` (and `fraud_status`) to ours.
///
/// Returns `None` for statuses that do not affect a transaction
/// (`authorize`, `refund`, ...).
pub fn map_gateway_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Option<TransactionStatus> {
    match transaction_status {
        "settlement" | "capture" => match fraud_status {
            None | Some("accept") => Some(TransactionStatus::Paid),
            Some("challenge") => Some(TransactionStatus::Pending),
            Some(_) => Some(TransactionStatus::Failed),
        },
        "pending" => Some(TransactionStatus::Pending),
        "deny" | "cancel" | "failure" => Some(TransactionStatus::Failed),
        "expire" => Some(TransactionStatus::Expired),
        _ => None,
    }
}

/// A billing student line going into a charge.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ChargeLine {
    id: Uuid,
    student_id: Uuid,
    amount: i64,
    status: String,
    billing_name: String,
    detail_name: String,
}

/// Build the gateway charge. The admin fee is its own line so the item
/// prices add up to the gross amount.
fn build_charge_request(
    invoice_number: &str,
    method: &PaymentMethod,
    customer_name: &str,
    customer_email: Option<String>,
    expiry_minutes: i64,
    lines: &[ChargeLine],
) -> ChargeRequest {
    let mut items: Vec<ChargeItem> = lines
        .iter()
        .map(|line| ChargeItem {
            id: line.id.to_string(),
            name: truncate(&format!("{} - {}", line.billing_name, line.detail_name), 50),
            price: line.amount,
            quantity: 1,
        })
        .collect();
    if method.admin_fee > 0 {
        items.push(ChargeItem {
            id: "admin-fee".to_string(),
            name: "Admin fee".to_string(),
            price: method.admin_fee,
            quantity: 1,
        });
    }
    ChargeRequest {
        order_id: invoice_number.to_string(),
        gross_amount: items.iter().map(|i| i.price * i.quantity).sum(),
        payment_type: method.channel.clone(),
        bank_code: method.bank_code.clone(),
        customer_name: customer_name.to_string(),
        customer_email,
        expiry_minutes,
        items,
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Check the requested lines against what was loaded for them.
fn check_charge_lines(
    requested: &[Uuid],
    lines: &[ChargeLine],
    student_id: Uuid,
) -> Result<(), AppError> {
    if requested.is_empty() {
        return Err(AppError::invalid("billing_student_ids must not be empty"));
    }
    let unique: HashSet<&Uuid> = requested.iter().collect();
    if unique.len() != requested.len() {
        return Err(AppError::invalid("billing_student_ids contains duplicates"));
    }
    if lines.len() != requested.len() {
        return Err(AppError::NotFound("Billing student"));
    }
    for line in lines {
        if line.student_id != student_id {
            return Err(AppError::invalid(format!(
                "Billing student {} does not belong to the student",
                line.id
            )));
        }
        if line.status != BillingStatus::Unpaid.as_str() {
            return Err(AppError::conflict(format!(
                "Billing student {} is already {}",
                line.id, line.status
            )));
        }
    }
    Ok(())
}

pub async fn create_transaction(
    state: &AppState,
    auth: &AuthContext,
    request: CreateTransactionRequest,
) -> Result<TransactionResponse, AppError> {
    let pool = &state.pool;
    let student = student_service::get_student(pool, auth, request.student_id).await?;
    let method = payment_method_service::get_payment_method(pool, auth, request.payment_method_id)
        .await?;
    if !method.is_active || method.school_id != student.school_id {
        return Err(AppError::invalid("Payment method is not available for this student"));
    }

    let customer_email: Option<String> = sqlx::query_scalar(
        r#"
        SELECT u.email FROM student_guardians sg
        JOIN users u ON u.id = sg.user_id
        WHERE sg.student_id = $1 AND sg.deleted_at IS NULL AND u.email IS NOT NULL
        ORDER BY (u.id = $2) DESC, sg.created_at
        LIMIT 1
        "#,
    )
    .bind(student.id)
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?;

    let mut tx = pool.begin().await?;

    // Lock the rows so two payments cannot claim the same installment
    let lines = sqlx::query_as::<_, ChargeLine>(
        r#"
        SELECT bs.id, bs.student_id, bs.amount, bs.status,
               b.name AS billing_name, d.name AS detail_name
        FROM billing_students bs
        JOIN billings b ON b.id = bs.billing_id
        JOIN billing_details d ON d.id = bs.billing_detail_id
        WHERE bs.id = ANY($1) AND bs.deleted_at IS NULL
        ORDER BY bs.due_date, d.sequence
        FOR UPDATE OF bs
        "#,
    )
    .bind(&request.billing_student_ids)
    .fetch_all(&mut *tx)
    .await?;
    check_charge_lines(&request.billing_student_ids, &lines, student.id)?;

    let amount: i64 = lines.iter().map(|l| l.amount).sum();
    let total_amount = amount + method.admin_fee;
    if total_amount <= 0 {
        return Err(AppError::invalid("Nothing to pay"));
    }

    let invoice_number = reserve_invoice_number(pool, student.school_id).await?;
    let expires_at = Utc::now() + Duration::minutes(state.config.payment_expiry_minutes);

    let transaction_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO transaction_billings
            (school_id, student_id, payment_method_id, invoice_number, amount, admin_fee,
             total_amount, status, expires_at, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
        RETURNING id
        "#,
    )
    .bind(student.school_id)
    .bind(student.id)
    .bind(method.id)
    .bind(&invoice_number)
    .bind(amount)
    .bind(method.admin_fee)
    .bind(total_amount)
    .bind(TransactionStatus::Pending.as_str())
    .bind(expires_at)
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut items: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO transaction_billing_items (transaction_billing_id, billing_student_id, amount) ",
    );
    items.push_values(&lines, |mut row, line| {
        row.push_bind(transaction_id)
            .push_bind(line.id)
            .push_bind(line.amount);
    });
    items.build().execute(&mut *tx).await?;

    sqlx::query(
        r#"
        UPDATE billing_students
        SET status = $2, transaction_billing_id = $3, updated_by = $4, updated_at = NOW()
        WHERE id = ANY($1)
        "#,
    )
    .bind(&request.billing_student_ids)
    .bind(BillingStatus::Pending.as_str())
    .bind(transaction_id)
    .bind(auth.user_id)
    .execute(&mut *tx)
    .await?;

    let charge = build_charge_request(
        &invoice_number,
        &method,
        &student.name,
        customer_email,
        state.config.payment_expiry_minutes,
        &lines,
    );
    // Dropping `tx` on error rolls back the transaction and its items
    let response = state.gateway.create_charge(&charge).await.map_err(|e| {
        tracing::warn!(%invoice_number, error = %e, "gateway charge failed");
        AppError::Gateway(e.to_string())
    })?;

    sqlx::query(
        "UPDATE transaction_billings SET payment_token = $2, redirect_url = $3 WHERE id = $1",
    )
    .bind(transaction_id)
    .bind(&response.token)
    .bind(&response.redirect_url)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        %transaction_id,
        %invoice_number,
        total_amount,
        items = lines.len(),
        "transaction created"
    );
    load_response(pool, transaction_id).await
}

async fn load_response(pool: &DbPool, id: Uuid) -> Result<TransactionResponse, AppError> {
    let transaction = sqlx::query_as::<_, TransactionBilling>(
        "SELECT * FROM transaction_billings WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Transaction"))?;

    let items = sqlx::query_as::<_, TransactionItem>(
        r#"
        SELECT ti.billing_student_id, ti.amount, b.name AS billing_name, d.name AS detail_name
        FROM transaction_billing_items ti
        JOIN billing_students bs ON bs.id = ti.billing_student_id
        JOIN billings b ON b.id = bs.billing_id
        JOIN billing_details d ON d.id = bs.billing_detail_id
        WHERE ti.transaction_billing_id = $1
        ORDER BY bs.due_date
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(TransactionResponse { transaction, items })
}

/// Load a transaction the caller may see: staff of its school, or a
/// guardian of its student.
pub async fn get_transaction(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<TransactionResponse, AppError> {
    let response = load_response(pool, id).await?;
    let transaction = &response.transaction;
    if !auth.can_access_school(transaction.school_id) {
        return Err(AppError::NotFound("Transaction"));
    }
    if auth.is_guardian() {
        if !student_service::is_guardian_of(pool, auth.user_id, transaction.student_id).await? {
            return Err(AppError::NotFound("Transaction"));
        }
    } else {
        auth.require_staff()?;
    }
    Ok(response)
}

pub async fn list_transactions(
    pool: &DbPool,
    auth: &AuthContext,
    filter: &TransactionFilter,
    query: &ListQuery,
) -> Result<Page<TransactionBilling>, AppError> {
    if !auth.is_guardian() {
        auth.require_staff()?;
    }
    let status = filter
        .status
        .as_deref()
        .map(|s| s.parse::<TransactionStatus>().map_err(AppError::invalid))
        .transpose()?;
    let scope = TransactionScope {
        school_id: auth.school_filter(filter.school_id),
        guardian_id: auth.is_guardian().then_some(auth.user_id),
        student_id: filter.student_id,
        status,
        search: query.search_pattern(),
    };

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM transaction_billings");
    push_filters(&mut count, &scope);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM transaction_billings");
    push_filters(&mut select, &scope);
    query.push_page(&mut select, SORTABLE, "created_at");
    let transactions = select
        .build_query_as::<TransactionBilling>()
        .fetch_all(pool)
        .await?;

    Ok(Page::new(transactions, query, total))
}

struct TransactionScope {
    school_id: Option<Uuid>,
    guardian_id: Option<Uuid>,
    student_id: Option<Uuid>,
    status: Option<TransactionStatus>,
    search: Option<String>,
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, scope: &TransactionScope) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = scope.school_id {
        builder.push(" AND school_id = ").push_bind(id);
    }
    if let Some(guardian) = scope.guardian_id {
        builder
            .push(" AND student_id IN (SELECT student_id FROM student_guardians WHERE deleted_at IS NULL AND user_id = ")
            .push_bind(guardian)
            .push(")");
    }
    if let Some(id) = scope.student_id {
        builder.push(" AND student_id = ").push_bind(id);
    }
    if let Some(status) = scope.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(pattern) = scope.search.clone() {
        builder.push(" AND invoice_number ILIKE ").push_bind(pattern);
    }
}

/// Persistence used by reconciliation.
#[async_trait]
pub trait ReconcileStore: Send + Sync {
    async fn find_by_invoice(
        &self,
        invoice_number: &str,
    ) -> Result<Option<TransactionBilling>, AppError>;

    /// Move a still-pending transaction to `next` together with its billing
    /// students. Returns `false` if it was no longer pending.
    async fn apply(
        &self,
        transaction: &TransactionBilling,
        next: TransactionStatus,
        notification: Option<&GatewayNotification>,
    ) -> Result<bool, AppError>;

    /// Tell the student's guardians the payment arrived.
    async fn send_receipt(&self, transaction: &TransactionBilling) -> Result<(), AppError>;
}

/// Apply a gateway status to the transaction it names.
///
/// The caller is responsible for authenticating `notification`.
pub async fn reconcile(
    store: &dyn ReconcileStore,
    notification: &GatewayNotification,
) -> Result<ReconcileOutcome, AppError> {
    let transaction = store
        .find_by_invoice(&notification.order_id)
        .await?
        .ok_or(AppError::NotFound("Transaction"))?;
    let current = transaction.status();

    let gross = parse_gross_amount(&notification.gross_amount);
    if gross != Some(transaction.total_amount) {
        tracing::warn!(
            invoice_number = %transaction.invoice_number,
            expected = transaction.total_amount,
            received = %notification.gross_amount,
            "gross amount mismatch"
        );
        return Err(AppError::invalid("gross_amount does not match the transaction"));
    }

    let Some(next) = map_gateway_status(
        &notification.transaction_status,
        notification.fraud_status.as_deref(),
    ) else {
        tracing::info!(
            invoice_number = %transaction.invoice_number,
            status = %notification.transaction_status,
            "ignoring gateway status"
        );
        return Ok(ReconcileOutcome::Unchanged(current));
    };

    if current.is_final() || next == current {
        if current.is_final() && next != current {
            tracing::info!(
                invoice_number = %transaction.invoice_number,
                %current,
                %next,
                "transaction already final"
            );
        }
        return Ok(ReconcileOutcome::Unchanged(current));
    }

    if !store.apply(&transaction, next, Some(notification)).await? {
        return Ok(ReconcileOutcome::Unchanged(current));
    }
    tracing::info!(invoice_number = %transaction.invoice_number, status = %next, "transaction reconciled");

    if next == TransactionStatus::Paid {
        if let Err(e) = store.send_receipt(&transaction).await {
            tracing::warn!(invoice_number = %transaction.invoice_number, error = %e, "receipt failed");
        }
    }
    Ok(ReconcileOutcome::Updated(next))
}

/// Postgres-backed store; receipts go out through the notification service.
pub struct PgReconcileStore<'a> {
    state: &'a AppState,
}

impl<'a> PgReconcileStore<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }
}

/// Settlement time from the gateway (`2025-07-10 10:15:00`, WIB) in UTC.
fn parse_settlement_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(raw?, "%Y-%m-%d %H:%M:%S").ok()?;
    Some(naive.and_utc() - Duration::hours(7))
}

#[async_trait]
impl ReconcileStore for PgReconcileStore<'_> {
    async fn find_by_invoice(
        &self,
        invoice_number: &str,
    ) -> Result<Option<TransactionBilling>, AppError> {
        Ok(sqlx::query_as::<_, TransactionBilling>(
            "SELECT * FROM transaction_billings WHERE invoice_number = $1 AND deleted_at IS NULL",
        )
        .bind(invoice_number)
        .fetch_optional(&self.state.pool)
        .await?)
    }

    async fn apply(
        &self,
        transaction: &TransactionBilling,
        next: TransactionStatus,
        notification: Option<&GatewayNotification>,
    ) -> Result<bool, AppError> {
        let paid_at = (next == TransactionStatus::Paid).then(|| {
            parse_settlement_time(notification.and_then(|n| n.settlement_time.as_deref()))
                .unwrap_or_else(Utc::now)
        });
        let payload = notification
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| AppError::Internal(format!("cannot store gateway payload: {e}")))?;

        let mut tx = self.state.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE transaction_billings
            SET status = $2,
                paid_at = $3,
                gateway_transaction_id = COALESCE($4, gateway_transaction_id),
                gateway_payload = COALESCE($5, gateway_payload),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(transaction.id)
        .bind(next.as_str())
        .bind(paid_at)
        .bind(notification.and_then(|n| n.transaction_id.clone()))
        .bind(payload)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(false);
        }

        match next {
            TransactionStatus::Paid => {
                sqlx::query(
                    r#"
                    UPDATE billing_students SET status = 'paid', paid_at = $2, updated_at = NOW()
                    WHERE transaction_billing_id = $1 AND deleted_at IS NULL
                    "#,
                )
                .bind(transaction.id)
                .bind(paid_at)
                .execute(&mut *tx)
                .await?;
            }
            TransactionStatus::Failed | TransactionStatus::Expired => {
                sqlx::query(
                    r#"
                    UPDATE billing_students
                    SET status = 'unpaid', transaction_billing_id = NULL, updated_at = NOW()
                    WHERE transaction_billing_id = $1 AND status = 'pending'
                    "#,
                )
                .bind(transaction.id)
                .execute(&mut *tx)
                .await?;
            }
            TransactionStatus::Pending => {}
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn send_receipt(&self, transaction: &TransactionBilling) -> Result<(), AppError> {
        let student_name: String = sqlx::query_scalar("SELECT name FROM students WHERE id = $1")
            .bind(transaction.student_id)
            .fetch_one(&self.state.pool)
            .await?;
        let (title, body) = notification_service::receipt_message(
            &transaction.invoice_number,
            &student_name,
            transaction.total_amount,
        );
        let guardians =
            notification_service::guardians_of(&self.state.pool, transaction.student_id).await?;
        notification_service::notify_users(
            self.state,
            &guardians,
            &title,
            &body,
            notification_service::CHANNEL_PAYMENT,
        )
        .await;
        Ok(())
    }
}

/// Webhook entry point: authenticate the notification, then reconcile.
pub async fn handle_notification(
    state: &AppState,
    notification: GatewayNotification,
) -> Result<ReconcileOutcome, AppError> {
    if !verify_notification(&notification, state.gateway.server_key()) {
        tracing::warn!(order_id = %notification.order_id, "notification signature mismatch");
        return Err(AppError::Unauthorized);
    }
    reconcile(&PgReconcileStore::new(state), &notification).await
}

/// Ask the gateway for the current status of one transaction and apply it.
pub async fn sync_transaction(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
) -> Result<TransactionResponse, AppError> {
    let current = get_transaction(&state.pool, auth, id).await?;
    let store = PgReconcileStore::new(state);
    sync_one(state, &store, &current.transaction).await?;
    load_response(&state.pool, id).await
}

/// Fetch and apply the gateway status of `transaction`.
///
/// An order the gateway does not know is expired once past `expires_at`.
async fn sync_one(
    state: &AppState,
    store: &dyn ReconcileStore,
    transaction: &TransactionBilling,
) -> Result<ReconcileOutcome, AppError> {
    match state.gateway.fetch_status(&transaction.invoice_number).await {
        Ok(status) => reconcile(store, &status).await,
        Err(GatewayError::NotFound) => expire_if_overdue(store, transaction, Utc::now()).await,
        Err(e) => Err(AppError::Gateway(e.to_string())),
    }
}

async fn expire_if_overdue(
    store: &dyn ReconcileStore,
    transaction: &TransactionBilling,
    now: DateTime<Utc>,
) -> Result<ReconcileOutcome, AppError> {
    let current = transaction.status();
    if current.is_final() || transaction.expires_at > now {
        return Ok(ReconcileOutcome::Unchanged(current));
    }
    if store.apply(transaction, TransactionStatus::Expired, None).await? {
        tracing::info!(invoice_number = %transaction.invoice_number, "unresolved transaction expired");
        Ok(ReconcileOutcome::Updated(TransactionStatus::Expired))
    } else {
        Ok(ReconcileOutcome::Unchanged(current))
    }
}

/// Poll the gateway for pending transactions older than `min_age_minutes`.
///
/// Returns how many transactions changed status.
pub async fn poll_pending_transactions(
    state: &AppState,
    min_age_minutes: i64,
) -> Result<usize, AppError> {
    let pending = sqlx::query_as::<_, TransactionBilling>(
        r#"
        SELECT * FROM transaction_billings
        WHERE status = 'pending' AND deleted_at IS NULL AND created_at < $1
        ORDER BY created_at
        LIMIT 200
        "#,
    )
    .bind(Utc::now() - Duration::minutes(min_age_minutes))
    .fetch_all(&state.pool)
    .await?;

    let store = PgReconcileStore::new(state);
    let mut changed = 0;
    for transaction in &pending {
        match sync_one(state, &store, transaction).await {
            Ok(ReconcileOutcome::Updated(_)) => changed += 1,
            Ok(ReconcileOutcome::Unchanged(_)) => {}
            Err(e) => tracing::warn!(
                invoice_number = %transaction.invoice_number,
                error = %e,
                "payment poll failed"
            ),
        }
    }
    if changed > 0 {
        tracing::info!(polled = pending.len(), changed, "payment poll finished");
    }
    Ok(changed)
}

#[cfg(test)]
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory store keyed by invoice number.
    #[derive(Default)]
    pub struct MockReconcileStore {
        pub transactions: Mutex<HashMap<String, TransactionBilling>>,
        pub receipts: Mutex<Vec<String>>,
    }

    impl MockReconcileStore {
        pub fn with(transaction: TransactionBilling) -> Self {
            let store = Self::default();
            store
                .transactions
                .lock()
                .unwrap()
                .insert(transaction.invoice_number.clone(), transaction);
            store
        }

        pub fn status_of(&self, invoice_number: &str) -> TransactionStatus {
            self.transactions.lock().unwrap()[invoice_number].status()
        }
    }

    #[async_trait]
    impl ReconcileStore for MockReconcileStore {
        async fn find_by_invoice(
            &self,
            invoice_number: &str,
        ) -> Result<Option<TransactionBilling>, AppError> {
            Ok(self.transactions.lock().unwrap().get(invoice_number).cloned())
        }

        async fn apply(
            &self,
            transaction: &TransactionBilling,
            next: TransactionStatus,
            _notification: Option<&GatewayNotification>,
        ) -> Result<bool, AppError> {
            let mut transactions = self.transactions.lock().unwrap();
            let stored = transactions
                .get_mut(&transaction.invoice_number)
                .ok_or(AppError::NotFound("Transaction"))?;
            if stored.status() != TransactionStatus::Pending {
                return Ok(false);
            }
            stored.status = next.as_str().to_string();
            if next == TransactionStatus::Paid {
                stored.paid_at = Some(Utc::now());
            }
            Ok(true)
        }

        async fn send_receipt(&self, transaction: &TransactionBilling) -> Result<(), AppError> {
            self.receipts
                .lock()
                .unwrap()
                .push(transaction.invoice_number.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::mock::MockReconcileStore;
    use super::*;
    use crate::clients::gateway::mock::{MockGateway, signed_notification};
    use crate::models::audit::Audit;
    use crate::models::billing::GenerateBillingRequest;
    use crate::services::billing_service;
    use crate::state::test_support::{ADMIN_FEE, Fixture, db_state, super_admin, with_gateway};

    const INVOICE: &str = "INV/SDN01/20250710/00001";

    fn transaction(total_amount: i64) -> TransactionBilling {
        TransactionBilling {
            id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            payment_method_id: Uuid::new_v4(),
            invoice_number: INVOICE.to_string(),
            amount: total_amount - 5_000,
            admin_fee: 5_000,
            total_amount,
            status: "pending".to_string(),
            gateway_transaction_id: None,
            payment_token: None,
            redirect_url: None,
            paid_at: None,
            expires_at: Utc::now() + Duration::hours(24),
            gateway_payload: None,
            audit: Audit::fresh(None),
        }
    }

    fn method(admin_fee: i64) -> PaymentMethod {
        PaymentMethod {
            id: Uuid::new_v4(),
            school_id: Uuid::new_v4(),
            name: "BCA Virtual Account".to_string(),
            channel: "bank_transfer".to_string(),
            bank_code: Some("BCA".to_string()),
            account_number: None,
            account_name: None,
            admin_fee,
            is_active: true,
            audit: Audit::fresh(None),
        }
    }

    fn line(student_id: Uuid, amount: i64, status: &str) -> ChargeLine {
        ChargeLine {
            id: Uuid::new_v4(),
            student_id,
            amount,
            status: status.to_string(),
            billing_name: "SPP 2025/2026".to_string(),
            detail_name: "July".to_string(),
        }
    }

    #[test]
    fn invoice_numbers_use_date_and_padded_sequence() {
        let date = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        assert_eq!(format_invoice_number("SDN01", date, 1), "INV/SDN01/20250710/00001");
        assert_eq!(format_invoice_number("SDN01", date, 42), "INV/SDN01/20250710/00042");
    }

    #[test]
    fn invoice_sequence_restarts_each_day() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 7, 11).unwrap();
        assert_ne!(
            invoice_sequence_scope("SDN01", today),
            invoice_sequence_scope("SDN01", tomorrow)
        );
    }

    #[test]
    fn invoice_sequence_follows_the_school_code() {
        let today = NaiveDate::from_ymd_opt(2025, 7, 10).unwrap();
        assert_eq!(
            invoice_sequence_scope("SDN01", today),
            "invoice:SDN01:20250710"
        );
        assert_ne!(
            invoice_sequence_scope("SDN01", today),
            invoice_sequence_scope("SDN02", today)
        );
    }

    #[test]
    fn maps_gateway_statuses() {
        use TransactionStatus::*;
        assert_eq!(map_gateway_status("settlement", None), Some(Paid));
        assert_eq!(map_gateway_status("capture", Some("accept")), Some(Paid));
        assert_eq!(map_gateway_status("capture", Some("challenge")), Some(Pending));
        assert_eq!(map_gateway_status("capture", Some("deny")), Some(Failed));
        assert_eq!(map_gateway_status("pending", None), Some(Pending));
        assert_eq!(map_gateway_status("deny", None), Some(Failed));
        assert_eq!(map_gateway_status("cancel", None), Some(Failed));
        assert_eq!(map_gateway_status("failure", None), Some(Failed));
        assert_eq!(map_gateway_status("expire", None), Some(Expired));
        assert_eq!(map_gateway_status("refund", None), None);
    }

    #[test]
    fn charge_includes_admin_fee_line() {
        let student = Uuid::new_v4();
        let lines = vec![line(student, 350_000, "unpaid"), line(student, 150_000, "unpaid")];
        let charge = build_charge_request(INVOICE, &method(5_000), "Ani", None, 1440, &lines);

        assert_eq!(charge.gross_amount, 505_000);
        assert_eq!(charge.items.len(), 3);
        assert_eq!(charge.items[2].id, "admin-fee");
        assert_eq!(charge.bank_code.as_deref(), Some("BCA"));
        assert_eq!(charge.payment_type, "bank_transfer");
    }

    #[test]
    fn charge_without_fee_has_no_fee_line() {
        let lines = vec![line(Uuid::new_v4(), 100_000, "unpaid")];
        let charge = build_charge_request(INVOICE, &method(0), "Ani", None, 60, &lines);
        assert_eq!(charge.items.len(), 1);
        assert_eq!(charge.gross_amount, 100_000);
    }

    #[test]
    fn charge_lines_must_be_unpaid_and_owned() {
        let student = Uuid::new_v4();
        let ok = line(student, 100, "unpaid");
        assert!(check_charge_lines(&[ok.id], std::slice::from_ref(&ok), student).is_ok());

        let pending = line(student, 100, "pending");
        assert!(matches!(
            check_charge_lines(&[pending.id], std::slice::from_ref(&pending), student),
            Err(AppError::Conflict(_))
        ));

        let other = line(Uuid::new_v4(), 100, "unpaid");
        assert!(check_charge_lines(&[other.id], std::slice::from_ref(&other), student).is_err());

        assert!(check_charge_lines(&[ok.id, ok.id], std::slice::from_ref(&ok), student).is_err());
        assert!(matches!(
            check_charge_lines(&[ok.id, Uuid::new_v4()], std::slice::from_ref(&ok), student),
            Err(AppError::NotFound(_))
        ));
        assert!(check_charge_lines(&[], &[], student).is_err());
    }

    #[tokio::test]
    async fn settlement_marks_paid_and_sends_receipt() {
        let store = MockReconcileStore::with(transaction(355_000));
        let notification = signed_notification(INVOICE, "settlement", "355000.00");

        let outcome = reconcile(&store, &notification).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated(TransactionStatus::Paid));
        assert_eq!(store.status_of(INVOICE), TransactionStatus::Paid);
        assert_eq!(*store.receipts.lock().unwrap(), vec![INVOICE.to_string()]);
    }

    #[tokio::test]
    async fn repeated_settlement_is_idempotent() {
        let store = MockReconcileStore::with(transaction(355_000));
        let notification = signed_notification(INVOICE, "settlement", "355000.00");

        reconcile(&store, &notification).await.unwrap();
        let again = reconcile(&store, &notification).await.unwrap();
        assert_eq!(again, ReconcileOutcome::Unchanged(TransactionStatus::Paid));
        assert_eq!(store.receipts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn paid_is_final() {
        let store = MockReconcileStore::with(transaction(355_000));
        reconcile(&store, &signed_notification(INVOICE, "settlement", "355000.00"))
            .await
            .unwrap();

        let late_expire = signed_notification(INVOICE, "expire", "355000.00");
        let outcome = reconcile(&store, &late_expire).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged(TransactionStatus::Paid));
        assert_eq!(store.status_of(INVOICE), TransactionStatus::Paid);
    }

    #[tokio::test]
    async fn pending_notification_changes_nothing() {
        let store = MockReconcileStore::with(transaction(355_000));
        let outcome = reconcile(&store, &signed_notification(INVOICE, "pending", "355000.00"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged(TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn failure_and_expiry_are_applied() {
        let store = MockReconcileStore::with(transaction(355_000));
        let outcome = reconcile(&store, &signed_notification(INVOICE, "cancel", "355000.00"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated(TransactionStatus::Failed));
        assert!(store.receipts.lock().unwrap().is_empty());

        let store = MockReconcileStore::with(transaction(355_000));
        let outcome = reconcile(&store, &signed_notification(INVOICE, "expire", "355000.00"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated(TransactionStatus::Expired));
    }

    #[tokio::test]
    async fn amount_mismatch_is_rejected() {
        let store = MockReconcileStore::with(transaction(355_000));
        let notification = signed_notification(INVOICE, "settlement", "1000.00");
        assert!(matches!(
            reconcile(&store, &notification).await,
            Err(AppError::InvalidRequest(_))
        ));
        assert_eq!(store.status_of(INVOICE), TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn unknown_invoice_is_not_found() {
        let store = MockReconcileStore::default();
        let notification = signed_notification("INV/X/20250101/00009", "settlement", "1.00");
        assert!(matches!(
            reconcile(&store, &notification).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unrelated_status_is_ignored() {
        let store = MockReconcileStore::with(transaction(355_000));
        let outcome = reconcile(&store, &signed_notification(INVOICE, "authorize", "355000.00"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged(TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn overdue_unknown_order_expires() {
        let mut overdue = transaction(355_000);
        overdue.expires_at = Utc::now() - Duration::minutes(1);
        let store = MockReconcileStore::with(overdue.clone());

        let outcome = expire_if_overdue(&store, &overdue, Utc::now()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated(TransactionStatus::Expired));

        let fresh = transaction(355_000);
        let store = MockReconcileStore::with(fresh.clone());
        let outcome = expire_if_overdue(&store, &fresh, Utc::now()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged(TransactionStatus::Pending));
    }

    #[test]
    fn settlement_time_is_converted_from_wib() {
        let parsed = parse_settlement_time(Some("2025-07-10 10:15:00")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2025-07-10T03:15:00+00:00");
        assert!(parse_settlement_time(Some("garbage")).is_none());
        assert!(parse_settlement_time(None).is_none());
    }

    #[tokio::test]
    async fn webhook_rejects_bad_signature_before_touching_storage() {
        let state = crate::state::test_support::lazy_state();
        let mut notification = signed_notification(INVOICE, "settlement", "355000.00");
        notification.signature_key = "0".repeat(128);
        assert!(matches!(
            handle_notification(&state, notification).await,
            Err(AppError::Unauthorized)
        ));
    }

    fn days_from_today(days: i64) -> NaiveDate {
        Utc::now().date_naive() + Duration::days(days)
    }

    /// A student with generated installments due in 10 and 40 days.
    async fn billed_student(state: &AppState) -> (Fixture, Uuid, Vec<Uuid>) {
        let fx = Fixture::seed(&state.pool).await;
        let student = fx.student(&state.pool, "1001").await;
        let billing = fx
            .billing(&state.pool, &[days_from_today(10), days_from_today(40)])
            .await;
        billing_service::generate_billing(
            &state.pool,
            &fx.admin(),
            billing,
            GenerateBillingRequest { student_ids: None },
        )
        .await
        .unwrap();
        let installments = fx
            .installments(&state.pool, student)
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        (fx, student, installments)
    }

    fn pay(fx: &Fixture, student: Uuid, installments: &[Uuid]) -> CreateTransactionRequest {
        CreateTransactionRequest {
            student_id: student,
            payment_method_id: fx.method_id,
            billing_student_ids: installments.to_vec(),
        }
    }

    #[tokio::test]
    async fn gateway_failure_rolls_back_and_keeps_the_invoice_number_used() {
        let failing = Arc::new(MockGateway {
            fail_charges: true,
            ..Default::default()
        });
        let Some(state) = db_state(failing).await else {
            return;
        };
        let (fx, student, installments) = billed_student(&state).await;

        let request = pay(&fx, student, &installments[..1]);
        let err = create_transaction(&state, &super_admin(), request).await.unwrap_err();
        assert!(matches!(err, AppError::Gateway(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);

        let statuses = fx.installments(&state.pool, student).await;
        assert!(statuses.iter().all(|(_, status)| status == "unpaid"));
        let stored: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transaction_billings WHERE student_id = $1")
                .bind(student)
                .fetch_one(&state.pool)
                .await
                .unwrap();
        assert_eq!(stored, 0);

        let gateway = Arc::new(MockGateway::default());
        let state = with_gateway(&state, gateway.clone());
        let request = pay(&fx, student, &installments[..1]);
        let created = create_transaction(&state, &super_admin(), request)
            .await
            .unwrap()
            .transaction;

        let today = Utc::now().date_naive();
        assert_eq!(created.invoice_number, format_invoice_number(&fx.school_code, today, 2));
        assert_eq!(created.total_amount, 350_000 + ADMIN_FEE);
        assert_eq!(gateway.charges.lock().unwrap()[0].order_id, created.invoice_number);
        assert_eq!(fx.installments(&state.pool, student).await[0].1, "pending");
    }

    #[tokio::test]
    async fn store_settles_or_releases_installments() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let (fx, student, installments) = billed_student(&state).await;
        let guardian = fx.guardian(&state.pool, student).await;
        let auth = super_admin();

        let paid = create_transaction(&state, &auth, pay(&fx, student, &installments[..1]))
            .await
            .unwrap()
            .transaction;
        let failed = create_transaction(&state, &auth, pay(&fx, student, &installments[1..]))
            .await
            .unwrap()
            .transaction;

        let store = PgReconcileStore::new(&state);
        let settlement = signed_notification(
            &paid.invoice_number,
            "settlement",
            &format!("{}.00", paid.total_amount),
        );
        assert_eq!(
            reconcile(&store, &settlement).await.unwrap(),
            ReconcileOutcome::Updated(TransactionStatus::Paid)
        );
        assert!(store.apply(&failed, TransactionStatus::Failed, None).await.unwrap());
        // Final transactions stay put
        assert!(!store.apply(&paid, TransactionStatus::Failed, None).await.unwrap());

        let rows: Vec<(Uuid, String, Option<Uuid>, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"
            SELECT id, status, transaction_billing_id, paid_at FROM billing_students
            WHERE student_id = $1 ORDER BY due_date
            "#,
        )
        .bind(student)
        .fetch_all(&state.pool)
        .await
        .unwrap();
        assert_eq!(rows[0].1, "paid");
        assert_eq!(rows[0].2, Some(paid.id));
        assert!(rows[0].3.is_some());
        assert_eq!((rows[1].1.as_str(), rows[1].2, rows[1].3), ("unpaid", None, None));

        let stored = store.find_by_invoice(&paid.invoice_number).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Paid);
        assert_eq!(
            stored.gateway_transaction_id.as_deref(),
            Some(format!("gw-{}", paid.invoice_number).as_str())
        );

        let receipts: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND channel = $2",
        )
        .bind(guardian)
        .bind(notification_service::CHANNEL_PAYMENT)
        .fetch_one(&state.pool)
        .await
        .unwrap();
        assert_eq!(receipts, 1);
    }
}
