//! Authentication: password hashing, bearer tokens, login and email verification.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::Config;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::notification::EmailMessage;
use crate::models::role;
use crate::models::user::{LoginRequest, LoginResponse, NewEmailVerification, UserWithRole};
use crate::services::email_dispatcher::EmailDispatcher;
use crate::services::user_service;

/// Claims carried in the bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    /// School id; absent for super admins
    pub sid: Option<Uuid>,
    pub role: String,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| AppError::Internal(format!("salt encoding failed: {e}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    PasswordHash::new(password_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < 8 {
        return Err(AppError::invalid("Password must be at least 8 characters"));
    }
    Ok(())
}

/// Sign a token for the user, returning it with its expiry.
pub fn issue_token(
    secret: &str,
    ttl_hours: i64,
    user_id: Uuid,
    school_id: Option<Uuid>,
    role: &str,
) -> Result<(String, DateTime<Utc>), AppError> {
    let expires_at = Utc::now() + Duration::hours(ttl_hours);
    let claims = Claims {
        sub: user_id,
        sid: school_id,
        role: role.to_string(),
        exp: expires_at.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))?;
    Ok((token, expires_at))
}

/// Validate signature and expiry; any failure is `Unauthorized`.
pub fn decode_token(secret: &str, token: &str) -> Result<Claims, AppError> {
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "rejected bearer token");
        AppError::Unauthorized
    })
}

/// Random URL-safe token (64 hex chars) and the hash stored for it.
pub fn generate_verification_token() -> (String, String) {
    let bytes: [u8; 32] = rand::random();
    let token = hex::encode(bytes);
    let hash = hash_token(&token);
    (token, hash)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Check credentials and issue a bearer token.
///
/// Unknown usernames, wrong passwords and inactive users all answer
/// `Unauthorized` so usernames cannot be discovered.
pub async fn login(
    pool: &DbPool,
    config: &Config,
    request: LoginRequest,
) -> Result<LoginResponse, AppError> {
    let row = sqlx::query_as::<_, UserWithRole>(
        r#"
        SELECT u.*, r.code AS role_code
        FROM users u
        JOIN roles r ON r.id = u.role_id
        WHERE u.username = $1 AND u.deleted_at IS NULL
        "#,
    )
    .bind(request.username.trim())
    .fetch_optional(pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    if !row.user.is_active || !verify_password(&request.password, &row.user.password_hash) {
        tracing::info!(username = %row.user.username, "login rejected");
        return Err(AppError::Unauthorized);
    }

    let (access_token, expires_at) = issue_token(
        &config.jwt_secret,
        config.jwt_ttl_hours,
        row.user.id,
        row.user.school_id,
        &row.role_code,
    )?;

    tracing::info!(user_id = %row.user.id, role = %row.role_code, "user logged in");

    Ok(LoginResponse {
        access_token,
        token_type: "Bearer",
        expires_at,
        user: row.into(),
    })
}

/// Mark the link for `token` verified and stamp the user.
pub async fn verify_email(pool: &DbPool, token: &str) -> Result<(), AppError> {
    let token_hash = hash_token(token.trim());
    let mut tx = pool.begin().await?;

    let user_id: Uuid = sqlx::query_scalar(
        r#"
        UPDATE email_verifications
        SET verified_at = NOW()
        WHERE token_hash = $1 AND verified_at IS NULL AND expires_at > NOW()
        RETURNING user_id
        "#,
    )
    .bind(&token_hash)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::invalid("Verification link is invalid or expired"))?;

    sqlx::query("UPDATE users SET email_verified_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(%user_id, "email verified");
    Ok(())
}

/// A user that should receive a verification email.
#[derive(Debug, Clone)]
pub struct VerificationTarget {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
}

/// Collects verification links and hands them out in fixed-size batches.
pub struct VerificationBuffer {
    pending: Vec<NewEmailVerification>,
    flush_size: usize,
}

impl VerificationBuffer {
    pub fn new(flush_size: usize) -> Self {
        Self {
            pending: Vec::with_capacity(flush_size),
            flush_size: flush_size.max(1),
        }
    }

    /// Add a link; returns a full batch once `flush_size` is reached.
    pub fn push(&mut self, item: NewEmailVerification) -> Option<Vec<NewEmailVerification>> {
        self.pending.push(item);
        if self.pending.len() >= self.flush_size {
            Some(std::mem::replace(
                &mut self.pending,
                Vec::with_capacity(self.flush_size),
            ))
        } else {
            None
        }
    }

    /// Whatever is left after the last full batch.
    pub fn finish(self) -> Vec<NewEmailVerification> {
        self.pending
    }
}

async fn insert_verifications(
    pool: &DbPool,
    batch: &[NewEmailVerification],
) -> Result<(), AppError> {
    if batch.is_empty() {
        return Ok(());
    }
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO email_verifications (user_id, token_hash, expires_at) ");
    builder.push_values(batch, |mut row, item| {
        row.push_bind(item.user_id)
            .push_bind(&item.token_hash)
            .push_bind(item.expires_at);
    });
    builder.build().execute(pool).await?;
    tracing::debug!(count = batch.len(), "verification links flushed");
    Ok(())
}

/// Create verification links for `targets` and queue their emails.
///
/// Links are inserted in batches of `verification_flush_size`; emails are
/// queued only after every batch is stored, so no email points at a link
/// that does not exist.
pub async fn issue_verifications(
    pool: &DbPool,
    config: &Config,
    email: &EmailDispatcher,
    targets: Vec<VerificationTarget>,
) -> Result<usize, AppError> {
    let expires_at = Utc::now() + Duration::hours(config.verification_ttl_hours);
    let mut buffer = VerificationBuffer::new(config.verification_flush_size);
    let mut messages = Vec::with_capacity(targets.len());

    for target in targets {
        let (token, token_hash) = generate_verification_token();
        messages.push(verification_email(config, &target, &token)?);
        if let Some(batch) = buffer.push(NewEmailVerification {
            user_id: target.user_id,
            token_hash,
            expires_at,
        }) {
            insert_verifications(pool, &batch).await?;
        }
    }
    insert_verifications(pool, &buffer.finish()).await?;

    Ok(email.enqueue_all(messages).await)
}

fn verification_email(
    config: &Config,
    target: &VerificationTarget,
    token: &str,
) -> Result<EmailMessage, AppError> {
    let mut link = url::Url::parse(&config.app_base_url)
        .and_then(|base| base.join("/api/v1/auth/verify"))
        .map_err(|e| AppError::Internal(format!("invalid APP_BASE_URL: {e}")))?;
    link.query_pairs_mut().append_pair("token", token);

    Ok(EmailMessage {
        to: target.email.clone(),
        subject: "Verify your email address".to_string(),
        body: format!(
            "Hello {},\n\nPlease verify your email address by opening this link:\n{}\n\nThe link expires in {} hours.",
            target.full_name, link, config.verification_ttl_hours
        ),
    })
}

/// Create the configured super admin when none exists yet.
pub async fn bootstrap_super_admin(pool: &DbPool, config: &Config) -> Result<(), AppError> {
    let (Some(username), Some(password)) = (
        config.bootstrap_admin_username.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) else {
        return Ok(());
    };

    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM users u JOIN roles r ON r.id = u.role_id
            WHERE r.code = $1 AND u.deleted_at IS NULL
        )
        "#,
    )
    .bind(role::SUPER_ADMIN)
    .fetch_one(pool)
    .await?;
    if exists {
        return Ok(());
    }

    validate_password(password)?;
    let role_id = user_service::role_id_by_code(pool, role::SUPER_ADMIN).await?;
    sqlx::query(
        r#"
        INSERT INTO users (role_id, username, full_name, password_hash)
        VALUES ($1, $2, 'Super Admin', $3)
        "#,
    )
    .bind(role_id)
    .bind(username)
    .bind(hash_password(password)?)
    .execute(pool)
    .await?;

    tracing::info!(%username, "bootstrap super admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-with-enough-length";

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("short").is_err());
        assert!(validate_password("long enough").is_ok());
    }

    #[test]
    fn token_carries_school_and_role() {
        let user_id = Uuid::new_v4();
        let school_id = Uuid::new_v4();
        let (token, expires_at) =
            issue_token(SECRET, 1, user_id, Some(school_id), role::FINANCE).unwrap();
        assert!(expires_at > Utc::now());

        let claims = decode_token(SECRET, &token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.sid, Some(school_id));
        assert_eq!(claims.role, role::FINANCE);
    }

    #[test]
    fn token_signed_with_other_secret_is_unauthorized() {
        let (token, _) = issue_token(SECRET, 1, Uuid::new_v4(), None, role::SUPER_ADMIN).unwrap();
        assert!(matches!(
            decode_token("another-secret-entirely", &token),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let (token, _) = issue_token(SECRET, -2, Uuid::new_v4(), None, role::SUPER_ADMIN).unwrap();
        assert!(decode_token(SECRET, &token).is_err());
    }

    #[test]
    fn verification_token_hash_matches() {
        let (token, hash) = generate_verification_token();
        assert_eq!(token.len(), 64);
        assert_eq!(hash_token(&token), hash);
        assert_ne!(token, hash);
    }

    fn link(i: usize) -> NewEmailVerification {
        NewEmailVerification {
            user_id: Uuid::new_v4(),
            token_hash: format!("{i:064}"),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn buffer_flushes_every_full_batch() {
        let mut buffer = VerificationBuffer::new(500);
        let mut flushed = Vec::new();
        for i in 0..1203 {
            if let Some(batch) = buffer.push(link(i)) {
                flushed.push(batch.len());
            }
        }
        assert_eq!(flushed, vec![500, 500]);
        assert_eq!(buffer.finish().len(), 203);
    }

    #[test]
    fn verification_email_links_to_verify_endpoint() {
        let config = crate::config::test_config();
        let target = VerificationTarget {
            user_id: Uuid::new_v4(),
            email: "parent@example.com".to_string(),
            full_name: "Budi".to_string(),
        };
        let message = verification_email(&config, &target, "abc123").unwrap();
        assert_eq!(message.to, "parent@example.com");
        assert!(
            message
                .body
                .contains("http://localhost:3000/api/v1/auth/verify?token=abc123")
        );
    }
}
