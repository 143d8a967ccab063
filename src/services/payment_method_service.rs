//! Payment methods a school accepts.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::middleware::auth::AuthContext;
use crate::models::payment_method::{
    CreatePaymentMethodRequest, PaymentMethod, UpdatePaymentMethodRequest,
};
use crate::pagination::{ListQuery, Page};
use crate::services::master_data_service;
use crate::services::validation::{optional_trimmed, required};

const SORTABLE: &[&str] = &["name", "channel", "admin_fee", "created_at"];

/// Gateway payment types a method may use.
pub const CHANNELS: &[&str] = &[
    "bank_transfer",
    "echannel",
    "qris",
    "gopay",
    "shopeepay",
    "cstore",
];

pub fn normalize_channel(raw: &str) -> Result<String, AppError> {
    let channel = required(raw, "channel")?.to_ascii_lowercase();
    if !CHANNELS.contains(&channel.as_str()) {
        return Err(AppError::invalid(format!(
            "channel must be one of {}",
            CHANNELS.join(", ")
        )));
    }
    Ok(channel)
}

pub fn validate_admin_fee(fee: i64) -> Result<i64, AppError> {
    if fee < 0 {
        return Err(AppError::invalid("admin_fee must not be negative"));
    }
    Ok(fee)
}

fn normalize_account_number(raw: Option<String>) -> Result<Option<String>, AppError> {
    match optional_trimmed(raw) {
        Some(number) if !number.chars().all(|c| c.is_ascii_digit()) => Err(AppError::invalid(
            format!("account_number '{number}' must contain digits only"),
        )),
        other => Ok(other),
    }
}

async fn check_bank(dir: &str, bank_code: Option<String>) -> Result<Option<String>, AppError> {
    let Some(code) = optional_trimmed(bank_code).map(|c| c.to_ascii_uppercase()) else {
        return Ok(None);
    };
    if !master_data_service::bank_exists(dir, &code).await? {
        return Err(AppError::invalid(format!("Unknown bank code '{code}'")));
    }
    Ok(Some(code))
}

async fn account_taken(
    pool: &DbPool,
    account_number: &str,
    except: Option<Uuid>,
) -> Result<bool, AppError> {
    Ok(sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM payment_methods
            WHERE account_number = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR id <> $2)
        )
        "#,
    )
    .bind(account_number)
    .bind(except)
    .fetch_one(pool)
    .await?)
}

pub async fn create_payment_method(
    pool: &DbPool,
    master_data_dir: &str,
    auth: &AuthContext,
    request: CreatePaymentMethodRequest,
) -> Result<PaymentMethod, AppError> {
    auth.require_admin()?;
    let school_id = auth.school_scope(request.school_id)?;
    let name = required(&request.name, "name")?;
    let channel = normalize_channel(&request.channel)?;
    let admin_fee = validate_admin_fee(request.admin_fee)?;
    let bank_code = check_bank(master_data_dir, request.bank_code).await?;
    if channel == "bank_transfer" && bank_code.is_none() {
        return Err(AppError::invalid("bank_code is required for bank transfers"));
    }
    let account_number = normalize_account_number(request.account_number)?;
    if let Some(number) = &account_number {
        if account_taken(pool, number, None).await? {
            return Err(AppError::conflict(format!(
                "Account number '{number}' is already registered"
            )));
        }
    }

    let method = sqlx::query_as::<_, PaymentMethod>(
        r#"
        INSERT INTO payment_methods
            (school_id, name, channel, bank_code, account_number, account_name, admin_fee, created_by, updated_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
        RETURNING *
        "#,
    )
    .bind(school_id)
    .bind(name)
    .bind(&channel)
    .bind(bank_code)
    .bind(account_number)
    .bind(optional_trimmed(request.account_name))
    .bind(admin_fee)
    .bind(auth.user_id)
    .fetch_one(pool)
    .await?;

    tracing::info!(payment_method_id = %method.id, %channel, "payment method created");
    Ok(method)
}

/// Guardians may read methods too; they need them to pay.
pub async fn get_payment_method(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<PaymentMethod, AppError> {
    sqlx::query_as::<_, PaymentMethod>(
        r#"
        SELECT * FROM payment_methods
        WHERE id = $1 AND deleted_at IS NULL AND ($2::uuid IS NULL OR school_id = $2)
        "#,
    )
    .bind(id)
    .bind(auth.school_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Payment method"))
}

pub async fn list_payment_methods(
    pool: &DbPool,
    auth: &AuthContext,
    school_id: Option<Uuid>,
    query: &ListQuery,
) -> Result<Page<PaymentMethod>, AppError> {
    let school_id = auth.school_filter(school_id);
    // Guardians only ever see methods they can pay with
    let active_only = auth.is_guardian();
    let search = query.search_pattern();

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM payment_methods");
    push_filters(&mut count, school_id, active_only, search.clone());
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let mut select = QueryBuilder::new("SELECT * FROM payment_methods");
    push_filters(&mut select, school_id, active_only, search);
    query.push_page(&mut select, SORTABLE, "created_at");
    let methods = select.build_query_as::<PaymentMethod>().fetch_all(pool).await?;

    Ok(Page::new(methods, query, total))
}

fn push_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    school_id: Option<Uuid>,
    active_only: bool,
    search: Option<String>,
) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(id) = school_id {
        builder.push(" AND school_id = ").push_bind(id);
    }
    if active_only {
        builder.push(" AND is_active = true");
    }
    if let Some(pattern) = search {
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR bank_code ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

pub async fn update_payment_method(
    pool: &DbPool,
    master_data_dir: &str,
    auth: &AuthContext,
    id: Uuid,
    request: UpdatePaymentMethodRequest,
) -> Result<PaymentMethod, AppError> {
    auth.require_admin()?;
    get_payment_method(pool, auth, id).await?;

    let name = request.name.as_deref().map(|n| required(n, "name")).transpose()?;
    let admin_fee = request.admin_fee.map(validate_admin_fee).transpose()?;
    let bank_code = check_bank(master_data_dir, request.bank_code).await?;
    let account_number = normalize_account_number(request.account_number)?;
    if let Some(number) = &account_number {
        if account_taken(pool, number, Some(id)).await? {
            return Err(AppError::conflict(format!(
                "Account number '{number}' is already registered"
            )));
        }
    }

    sqlx::query_as::<_, PaymentMethod>(
        r#"
        UPDATE payment_methods
        SET name = COALESCE($2, name),
            bank_code = COALESCE($3, bank_code),
            account_number = COALESCE($4, account_number),
            account_name = COALESCE($5, account_name),
            admin_fee = COALESCE($6, admin_fee),
            is_active = COALESCE($7, is_active),
            updated_by = $8,
            updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(bank_code)
    .bind(account_number)
    .bind(optional_trimmed(request.account_name))
    .bind(admin_fee)
    .bind(request.is_active)
    .bind(auth.user_id)
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::NotFound("Payment method"))
}

/// Soft delete. Refused while a pending transaction uses the method.
pub async fn delete_payment_method(
    pool: &DbPool,
    auth: &AuthContext,
    id: Uuid,
) -> Result<(), AppError> {
    auth.require_admin()?;
    get_payment_method(pool, auth, id).await?;

    let in_use: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM transaction_billings
            WHERE payment_method_id = $1 AND status = 'pending' AND deleted_at IS NULL
        )
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if in_use {
        return Err(AppError::conflict("Payment method has pending transactions"));
    }

    sqlx::query("UPDATE payment_methods SET deleted_at = NOW(), deleted_by = $2 WHERE id = $1")
        .bind(id)
        .bind(auth.user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_are_checked() {
        assert_eq!(normalize_channel(" QRIS ").unwrap(), "qris");
        assert!(normalize_channel("cash").is_err());
    }

    #[test]
    fn negative_fee_is_rejected() {
        assert_eq!(validate_admin_fee(0).unwrap(), 0);
        assert_eq!(validate_admin_fee(4_000).unwrap(), 4_000);
        assert!(validate_admin_fee(-1).is_err());
    }

    #[test]
    fn account_numbers_are_digits() {
        assert_eq!(
            normalize_account_number(Some(" 1234567890 ".into())).unwrap(),
            Some("1234567890".into())
        );
        assert_eq!(normalize_account_number(Some("".into())).unwrap(), None);
        assert!(normalize_account_number(Some("12-34".into())).is_err());
    }

    #[tokio::test]
    async fn bank_code_must_exist_in_master_data() {
        let dir = crate::config::test_config().master_data_dir;
        assert_eq!(
            check_bank(&dir, Some("bni".into())).await.unwrap(),
            Some("BNI".into())
        );
        assert_eq!(check_bank(&dir, None).await.unwrap(), None);
        assert!(matches!(
            check_bank(&dir, Some("XYZ".into())).await,
            Err(AppError::InvalidRequest(_))
        ));
    }
}
