//! Route table.
//!
//! Public routes: health, login, email verification and the gateway webhook.
//! Everything else under `/api/v1` sits behind the bearer token middleware.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware, state::AppState};

pub fn router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::me))
        // Schools and academics
        .route(
            "/api/v1/schools",
            post(handlers::schools::create_school).get(handlers::schools::list_schools),
        )
        .route(
            "/api/v1/schools/{id}",
            get(handlers::schools::get_school)
                .put(handlers::schools::update_school)
                .delete(handlers::schools::delete_school),
        )
        .route(
            "/api/v1/school-years",
            post(handlers::academics::create_school_year)
                .get(handlers::academics::list_school_years),
        )
        .route(
            "/api/v1/school-years/{id}",
            get(handlers::academics::get_school_year)
                .put(handlers::academics::update_school_year)
                .delete(handlers::academics::delete_school_year),
        )
        .route(
            "/api/v1/school-grades",
            post(handlers::academics::create_school_grade)
                .get(handlers::academics::list_school_grades),
        )
        .route(
            "/api/v1/school-grades/{id}",
            get(handlers::academics::get_school_grade)
                .put(handlers::academics::update_school_grade)
                .delete(handlers::academics::delete_school_grade),
        )
        .route(
            "/api/v1/school-classes",
            post(handlers::academics::create_school_class)
                .get(handlers::academics::list_school_classes),
        )
        .route(
            "/api/v1/school-classes/{id}",
            get(handlers::academics::get_school_class)
                .put(handlers::academics::update_school_class)
                .delete(handlers::academics::delete_school_class),
        )
        // Roles and users
        .route(
            "/api/v1/roles",
            post(handlers::roles::create_role).get(handlers::roles::list_roles),
        )
        .route(
            "/api/v1/roles/{id}",
            get(handlers::roles::get_role)
                .put(handlers::roles::update_role)
                .delete(handlers::roles::delete_role),
        )
        .route(
            "/api/v1/users",
            post(handlers::users::create_user).get(handlers::users::list_users),
        )
        .route(
            "/api/v1/users/{id}",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .route(
            "/api/v1/users/{id}/resend-verification",
            post(handlers::users::resend_verification),
        )
        // Students
        .route(
            "/api/v1/students",
            post(handlers::students::create_student).get(handlers::students::list_students),
        )
        .route(
            "/api/v1/students/import",
            post(handlers::students::import_students),
        )
        .route(
            "/api/v1/students/{id}",
            get(handlers::students::get_student)
                .put(handlers::students::update_student)
                .delete(handlers::students::delete_student),
        )
        .route(
            "/api/v1/students/{id}/guardians",
            get(handlers::students::list_guardians).post(handlers::students::attach_guardian),
        )
        .route(
            "/api/v1/students/{id}/guardians/{user_id}",
            axum::routing::delete(handlers::students::detach_guardian),
        )
        .route(
            "/api/v1/students/{id}/billings",
            get(handlers::students::list_student_billings),
        )
        // Billing setup
        .route(
            "/api/v1/billing-types",
            post(handlers::billing_types::create_billing_type)
                .get(handlers::billing_types::list_billing_types),
        )
        .route(
            "/api/v1/billing-types/{id}",
            get(handlers::billing_types::get_billing_type)
                .put(handlers::billing_types::update_billing_type)
                .delete(handlers::billing_types::delete_billing_type),
        )
        .route(
            "/api/v1/payment-methods",
            post(handlers::payment_methods::create_payment_method)
                .get(handlers::payment_methods::list_payment_methods),
        )
        .route(
            "/api/v1/payment-methods/{id}",
            get(handlers::payment_methods::get_payment_method)
                .put(handlers::payment_methods::update_payment_method)
                .delete(handlers::payment_methods::delete_payment_method),
        )
        .route(
            "/api/v1/billings",
            post(handlers::billings::create_billing).get(handlers::billings::list_billings),
        )
        .route(
            "/api/v1/billings/{id}",
            get(handlers::billings::get_billing)
                .put(handlers::billings::update_billing)
                .delete(handlers::billings::delete_billing),
        )
        .route(
            "/api/v1/billings/{id}/generate",
            post(handlers::billings::generate_billing),
        )
        .route(
            "/api/v1/billing-students",
            get(handlers::billings::list_billing_students),
        )
        // Payments
        .route(
            "/api/v1/transactions",
            post(handlers::transactions::create_transaction)
                .get(handlers::transactions::list_transactions),
        )
        .route(
            "/api/v1/transactions/{id}",
            get(handlers::transactions::get_transaction),
        )
        .route(
            "/api/v1/transactions/{id}/sync",
            post(handlers::transactions::sync_transaction),
        )
        // Notifications
        .route(
            "/api/v1/notifications",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/api/v1/notifications/{id}/read",
            post(handlers::notifications::mark_read),
        )
        .route("/api/v1/devices", post(handlers::notifications::register_device))
        // Master data and reports
        .route("/api/v1/master/banks", get(handlers::master_data::banks))
        .route(
            "/api/v1/master/billing-statuses",
            get(handlers::master_data::billing_statuses),
        )
        .route("/api/v1/master/provinces", get(handlers::master_data::provinces))
        .route(
            "/api/v1/master/provinces/{id}/cities",
            get(handlers::master_data::cities),
        )
        .route(
            "/api/v1/reports/billing-summary",
            get(handlers::reports::billing_summary),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::auth_middleware,
        ));

    Router::new()
        // Public routes (no authentication required)
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .route("/api/v1/auth/verify", get(handlers::auth::verify_email))
        .route(
            "/api/v1/payments/notification",
            post(handlers::payments::payment_notification),
        )
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::clients::gateway::mock::signed_notification;
    use crate::services::auth_service;
    use crate::state::test_support::lazy_state;

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let response = router(lazy_state())
            .oneshot(
                Request::get("/api/v1/students")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let response = router(lazy_state())
            .oneshot(
                Request::get("/api/v1/master/banks")
                    .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn token_signed_with_another_secret_is_rejected() {
        let (token, _) = auth_service::issue_token(
            "some-other-secret-value",
            1,
            uuid::Uuid::new_v4(),
            None,
            "super_admin",
        )
        .unwrap();
        let response = router(lazy_state())
            .oneshot(
                Request::get("/api/v1/auth/me")
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_with_bad_signature_is_unauthorized() {
        let mut notification =
            signed_notification("INV/SDN01/20250710/00001", "settlement", "355000.00");
        notification.signature_key = "f".repeat(128);

        let response = router(lazy_state())
            .oneshot(
                Request::post("/api/v1/payments/notification")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_vec(&notification).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn webhook_rejects_malformed_body() {
        let response = router(lazy_state())
            .oneshot(
                Request::post("/api/v1/payments/notification")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"order_id": 5}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = router(lazy_state())
            .oneshot(Request::get("/api/v2/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
