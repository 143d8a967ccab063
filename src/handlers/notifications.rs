//! The caller's notification inbox and push device registration.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::notification::{Notification, RegisterDeviceRequest},
    pagination::{ListQuery, Page},
    services::notification_service,
};

/// Newest first.
pub async fn list_notifications(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Notification>>, AppError> {
    Ok(Json(
        notification_service::list_my_notifications(&pool, &auth, &query).await?,
    ))
}

pub async fn mark_read(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(notification_service::mark_read(&pool, &auth, id).await?))
}

/// Register a push token: `{"token": "...", "platform": "android"}`.
pub async fn register_device(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<RegisterDeviceRequest>,
) -> Result<StatusCode, AppError> {
    notification_service::register_device(&pool, &auth, request).await?;
    Ok(StatusCode::NO_CONTENT)
}
