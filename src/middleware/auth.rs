//! Bearer token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the token from the Authorization header
//! 2. Verify its signature and expiry
//! 3. Confirm the user still exists and is active
//! 4. Inject authentication context into the request
//! 5. Reject unauthorized requests with HTTP 401

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{error::AppError, models::role, services::auth_service, state::AppState};

/// Authentication context attached to authenticated requests.
///
/// This struct is inserted into the request's extension map and can be
/// extracted by route handlers to know who made the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,

    /// The user's school. `None` only for super admins, who may act on any school.
    pub school_id: Option<Uuid>,

    /// Role code, e.g. `school_admin`
    pub role: String,
}

impl AuthContext {
    pub fn is_super_admin(&self) -> bool {
        self.role == role::SUPER_ADMIN
    }

    pub fn is_guardian(&self) -> bool {
        self.role == role::GUARDIAN
    }

    pub fn require_super_admin(&self) -> Result<(), AppError> {
        if self.is_super_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }

    /// Super admins and school admins.
    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role.as_str() {
            role::SUPER_ADMIN | role::SCHOOL_ADMIN => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }

    /// Admins plus finance staff: everyone who manages billing.
    pub fn require_staff(&self) -> Result<(), AppError> {
        match self.role.as_str() {
            role::SUPER_ADMIN | role::SCHOOL_ADMIN | role::FINANCE => Ok(()),
            _ => Err(AppError::Forbidden),
        }
    }

    /// Resolve the school a write applies to.
    ///
    /// School-bound users always act on their own school and may not name
    /// another one. Super admins must name the school explicitly.
    pub fn school_scope(&self, requested: Option<Uuid>) -> Result<Uuid, AppError> {
        match (self.school_id, requested) {
            (Some(own), Some(other)) if own != other => Err(AppError::Forbidden),
            (Some(own), _) => Ok(own),
            (None, Some(requested)) => Ok(requested),
            (None, None) => Err(AppError::invalid("school_id is required")),
        }
    }

    /// School filter for reads: the user's own school, or for super admins
    /// whatever they asked for (`None` = every school).
    pub fn school_filter(&self, requested: Option<Uuid>) -> Option<Uuid> {
        self.school_id.or(requested)
    }

    pub fn can_access_school(&self, school_id: Uuid) -> bool {
        self.school_id.is_none_or(|own| own == school_id)
    }
}

/// Authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <token>` header from request
/// 2. Decode and validate the token (HS256, expiry)
/// 3. Load the user and its current role; inactive or deleted users are rejected
/// 4. If valid: inject `AuthContext` into request, call next handler
/// 5. Otherwise: return 401 Unauthorized error
///
/// The role and school are read from the database rather than the token so
/// that role changes and deactivation take effect immediately.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let claims = auth_service::decode_token(&state.config.jwt_secret, token)?;

    let (school_id, role): (Option<Uuid>, String) = sqlx::query_as(
        r#"
        SELECT u.school_id, r.code
        FROM users u
        JOIN roles r ON r.id = u.role_id
        WHERE u.id = $1 AND u.is_active = true AND u.deleted_at IS NULL
        "#,
    )
    .bind(claims.sub)
    .fetch_optional(&state.pool)
    .await?
    .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(AuthContext {
        user_id: claims.sub,
        school_id,
        role,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
pub(crate) fn context(role: &str, school_id: Option<Uuid>) -> AuthContext {
    AuthContext {
        user_id: Uuid::new_v4(),
        school_id,
        role: role.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn school_user_is_confined_to_own_school() {
        let school = Uuid::new_v4();
        let auth = context(role::SCHOOL_ADMIN, Some(school));
        assert_eq!(auth.school_scope(None).unwrap(), school);
        assert_eq!(auth.school_scope(Some(school)).unwrap(), school);
        assert!(matches!(
            auth.school_scope(Some(Uuid::new_v4())),
            Err(AppError::Forbidden)
        ));
        assert_eq!(auth.school_filter(Some(Uuid::new_v4())), Some(school));
    }

    #[test]
    fn super_admin_must_name_a_school_for_writes() {
        let auth = context(role::SUPER_ADMIN, None);
        assert!(matches!(
            auth.school_scope(None),
            Err(AppError::InvalidRequest(_))
        ));
        let school = Uuid::new_v4();
        assert_eq!(auth.school_scope(Some(school)).unwrap(), school);
        assert_eq!(auth.school_filter(None), None);
        assert!(auth.can_access_school(school));
    }

    #[test]
    fn role_gates() {
        assert!(context(role::FINANCE, Some(Uuid::new_v4())).require_staff().is_ok());
        assert!(context(role::FINANCE, Some(Uuid::new_v4())).require_admin().is_err());
        assert!(context(role::GUARDIAN, Some(Uuid::new_v4())).require_staff().is_err());
        assert!(context(role::SCHOOL_ADMIN, Some(Uuid::new_v4())).require_super_admin().is_err());
        assert!(context(role::SUPER_ADMIN, None).require_admin().is_ok());
    }
}
