//! In-app, push and email notifications.
//!
//! [`notify_user`] is the single entry point: it stores the inbox row, pushes
//! to every registered device and queues an email when the user has an
//! address. Push and email problems are logged; only the inbox write can fail
//! the call.

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::notification::{EmailMessage, Notification, PushMessage, RegisterDeviceRequest};
use crate::pagination::{ListQuery, Page};
use crate::services::validation::required;
use crate::state::AppState;

pub const CHANNEL_PAYMENT: &str = "payment";
pub const CHANNEL_REMINDER: &str = "reminder";

const PLATFORMS: &[&str] = &["android", "ios", "web"];

/// Rupiah with dot thousands separators: `Rp355.000`.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let sign = if amount < 0 { "-" } else { "" };
    format!("{sign}Rp{grouped}")
}

pub fn receipt_message(invoice_number: &str, student_name: &str, total: i64) -> (String, String) {
    (
        "Payment received".to_string(),
        format!(
            "Payment {invoice_number} of {} for {student_name} has been received. Thank you.",
            format_rupiah(total)
        ),
    )
}

pub fn reminder_message(
    student_name: &str,
    billing_name: &str,
    detail_name: &str,
    amount: i64,
    due_date: NaiveDate,
) -> (String, String) {
    (
        "Payment reminder".to_string(),
        format!(
            "{billing_name} ({detail_name}) for {student_name} of {} is due on {}.",
            format_rupiah(amount),
            due_date.format("%d %b %Y")
        ),
    )
}

pub async fn notify_user(
    state: &AppState,
    user_id: Uuid,
    title: &str,
    body: &str,
    channel: &str,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO notifications (user_id, title, body, channel) VALUES ($1, $2, $3, $4)")
        .bind(user_id)
        .bind(title)
        .bind(body)
        .bind(channel)
        .execute(&state.pool)
        .await?;

    let tokens: Vec<String> = sqlx::query_scalar("SELECT token FROM user_devices WHERE user_id = $1")
        .bind(user_id)
        .fetch_all(&state.pool)
        .await?;
    for token in tokens {
        let message = PushMessage {
            token,
            title: title.to_string(),
            body: body.to_string(),
        };
        if let Err(e) = state.push.send(&message).await {
            tracing::warn!(%user_id, error = %e, "push delivery failed");
        }
    }

    let email: Option<String> = sqlx::query_scalar(
        "SELECT email FROM users WHERE id = $1 AND deleted_at IS NULL AND email IS NOT NULL",
    )
    .bind(user_id)
    .fetch_optional(&state.pool)
    .await?;
    if let Some(to) = email {
        let message = EmailMessage {
            to,
            subject: title.to_string(),
            body: body.to_string(),
        };
        if let Err(e) = state.email.enqueue(message).await {
            tracing::warn!(%user_id, error = %e, "notification email not queued");
        }
    }

    Ok(())
}

/// Notify each of `user_ids`; a failure for one user is logged and the rest
/// still go out. Returns how many were notified.
pub async fn notify_users(
    state: &AppState,
    user_ids: &[Uuid],
    title: &str,
    body: &str,
    channel: &str,
) -> usize {
    let mut sent = 0;
    for &user_id in user_ids {
        match notify_user(state, user_id, title, body, channel).await {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!(%user_id, %channel, error = %e, "notification failed"),
        }
    }
    sent
}

/// Live guardian user ids of a student.
pub async fn guardians_of(pool: &DbPool, student_id: Uuid) -> Result<Vec<Uuid>, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT sg.user_id FROM student_guardians sg
        JOIN users u ON u.id = sg.user_id
        WHERE sg.student_id = $1 AND sg.deleted_at IS NULL AND u.deleted_at IS NULL AND u.is_active
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?)
}

pub async fn list_my_notifications(
    pool: &DbPool,
    auth: &AuthContext,
    query: &ListQuery,
) -> Result<Page<Notification>, AppError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1")
        .bind(auth.user_id)
        .fetch_one(pool)
        .await?;
    let (limit, offset) = query.limit_offset();
    let items = sqlx::query_as::<_, Notification>(
        r#"
        SELECT * FROM notifications
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(auth.user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(Page::new(items, query, total))
}

pub async fn mark_read(pool: &DbPool, auth: &AuthContext, id: Uuid) -> Result<Notification, AppError> {
    sqlx::query_as::<_, Notification>(
        r#"
        UPDATE notifications SET read_at = COALESCE(read_at, NOW())
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Notification"))
}

/// Register a push token for the caller. A token moves to whoever registered it last.
pub async fn register_device(
    pool: &DbPool,
    auth: &AuthContext,
    request: RegisterDeviceRequest,
) -> Result<(), AppError> {
    let token = required(&request.token, "token")?;
    let platform = request.platform.trim().to_ascii_lowercase();
    if !PLATFORMS.contains(&platform.as_str()) {
        return Err(AppError::invalid(format!(
            "platform must be one of {}",
            PLATFORMS.join(", ")
        )));
    }

    sqlx::query(
        r#"
        INSERT INTO user_devices (user_id, token, platform)
        VALUES ($1, $2, $3)
        ON CONFLICT (token) DO UPDATE
        SET user_id = EXCLUDED.user_id, platform = EXCLUDED.platform, updated_at = NOW()
        "#,
    )
    .bind(auth.user_id)
    .bind(token)
    .bind(platform)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct DueItem {
    id: Uuid,
    student_id: Uuid,
    student_name: String,
    billing_name: String,
    detail_name: String,
    amount: i64,
    due_date: NaiveDate,
}

const REMINDER_BATCH: i64 = 500;

/// Due dates that get a reminder: from `today` up to `days_before` days ahead.
/// Installments already overdue are left out.
pub fn reminder_window(today: NaiveDate, days_before: i64) -> (NaiveDate, NaiveDate) {
    (today, today + Duration::days(days_before.max(0)))
}

/// Remind guardians about unpaid installments due within `days_before` days.
///
/// Each installment is reminded at most once a day. Batches are fetched until
/// nothing eligible is left; every fetched row is stamped, so the loop ends.
/// Returns the number of installments reminded.
pub async fn send_due_reminders(state: &AppState, days_before: i64) -> Result<usize, AppError> {
    let (from, until) = reminder_window(Utc::now().date_naive(), days_before);

    let mut reminded = 0;
    loop {
        let items = sqlx::query_as::<_, DueItem>(
            r#"
            SELECT bs.id, bs.student_id, s.name AS student_name, b.name AS billing_name,
                   d.name AS detail_name, bs.amount, bs.due_date
            FROM billing_students bs
            JOIN students s ON s.id = bs.student_id
            JOIN billings b ON b.id = bs.billing_id
            JOIN billing_details d ON d.id = bs.billing_detail_id
            WHERE bs.status = 'unpaid' AND bs.deleted_at IS NULL AND bs.amount > 0
              AND bs.due_date BETWEEN $1 AND $2
              AND (bs.last_reminded_at IS NULL OR bs.last_reminded_at < NOW() - INTERVAL '24 hours')
            ORDER BY bs.due_date
            LIMIT $3
            "#,
        )
        .bind(from)
        .bind(until)
        .bind(REMINDER_BATCH)
        .fetch_all(&state.pool)
        .await?;
        if items.is_empty() {
            break;
        }

        for item in items {
            let (title, body) = reminder_message(
                &item.student_name,
                &item.billing_name,
                &item.detail_name,
                item.amount,
                item.due_date,
            );
            let guardians = guardians_of(&state.pool, item.student_id).await?;
            notify_users(state, &guardians, &title, &body, CHANNEL_REMINDER).await;
            sqlx::query("UPDATE billing_students SET last_reminded_at = NOW() WHERE id = $1")
                .bind(item.id)
                .execute(&state.pool)
                .await?;
            reminded += 1;
        }
    }

    if reminded > 0 {
        tracing::info!(reminded, "due reminders sent");
    }
    Ok(reminded)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clients::gateway::mock::MockGateway;
    use crate::models::billing::GenerateBillingRequest;
    use crate::services::billing_service;
    use crate::state::test_support::{Fixture, db_state};

    #[test]
    fn rupiah_uses_dot_grouping() {
        assert_eq!(format_rupiah(0), "Rp0");
        assert_eq!(format_rupiah(999), "Rp999");
        assert_eq!(format_rupiah(355_000), "Rp355.000");
        assert_eq!(format_rupiah(1_250_000), "Rp1.250.000");
        assert_eq!(format_rupiah(-5_000), "-Rp5.000");
    }

    #[test]
    fn receipt_names_invoice_and_amount() {
        let (title, body) = receipt_message("INV/SDN01/20250710/00001", "Ani", 355_000);
        assert_eq!(title, "Payment received");
        assert!(body.contains("INV/SDN01/20250710/00001"));
        assert!(body.contains("Rp355.000"));
        assert!(body.contains("Ani"));
    }

    #[test]
    fn reminder_window_skips_overdue_installments() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 7).unwrap();
        let (from, until) = reminder_window(today, 3);
        assert_eq!(from, today);
        assert_eq!(until, NaiveDate::from_ymd_opt(2025, 8, 10).unwrap());

        let overdue = NaiveDate::from_ymd_opt(2025, 8, 6).unwrap();
        assert!(!(from..=until).contains(&overdue));
        assert_eq!(reminder_window(today, -2), (today, today));
    }

    #[test]
    fn reminder_shows_due_date() {
        let due = NaiveDate::from_ymd_opt(2025, 8, 10).unwrap();
        let (_, body) = reminder_message("Ani", "SPP 2025", "August", 350_000, due);
        assert!(body.contains("10 Aug 2025"));
        assert!(body.contains("SPP 2025 (August)"));
    }

    async fn notifications_for(pool: &DbPool, user_id: Uuid, channel: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE user_id = $1 AND channel = $2")
            .bind(user_id)
            .bind(channel)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn one_failing_recipient_does_not_stop_the_rest() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let fx = Fixture::seed(&state.pool).await;
        let student = fx.student(&state.pool, "5001").await;
        let guardian = fx.guardian(&state.pool, student).await;

        // An unknown user fails on the notifications foreign key
        let recipients = [Uuid::new_v4(), guardian];
        let sent =
            notify_users(&state, &recipients, "Payment received", "Thanks", CHANNEL_PAYMENT).await;

        assert_eq!(sent, 1);
        assert_eq!(notifications_for(&state.pool, guardian, CHANNEL_PAYMENT).await, 1);
    }

    #[tokio::test]
    async fn reminders_cover_upcoming_installments_only() {
        let Some(state) = db_state(Arc::new(MockGateway::default())).await else {
            return;
        };
        let pool = &state.pool;
        let fx = Fixture::seed(pool).await;
        let student = fx.student(pool, "6001").await;
        let guardian = fx.guardian(pool, student).await;
        let today = Utc::now().date_naive();
        let billing = fx
            .billing(pool, &[today - Duration::days(5), today + Duration::days(2)])
            .await;
        billing_service::generate_billing(
            pool,
            &fx.admin(),
            billing,
            GenerateBillingRequest { student_ids: None },
        )
        .await
        .unwrap();

        let reminded = send_due_reminders(&state, 3).await.unwrap();
        assert!(reminded >= 1);

        let stamped: Vec<bool> = sqlx::query_scalar(
            r#"
            SELECT last_reminded_at IS NOT NULL FROM billing_students
            WHERE student_id = $1 ORDER BY due_date
            "#,
        )
        .bind(student)
        .fetch_all(pool)
        .await
        .unwrap();
        assert_eq!(stamped, vec![false, true]);
        assert_eq!(notifications_for(pool, guardian, CHANNEL_REMINDER).await, 1);

        // Already reminded today
        send_due_reminders(&state, 3).await.unwrap();
        assert_eq!(notifications_for(pool, guardian, CHANNEL_REMINDER).await, 1);
    }
}
