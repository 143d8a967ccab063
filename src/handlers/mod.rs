//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, query string)
//! 2. Delegates to the matching service
//! 3. Returns HTTP response (JSON, status code)

pub mod academics;
pub mod auth;
pub mod billing_types;
pub mod billings;
pub mod health;
pub mod master_data;
pub mod notifications;
pub mod payment_methods;
/// Gateway webhook (public)
pub mod payments;
pub mod reports;
pub mod roles;
pub mod schools;
pub mod students;
pub mod transactions;
pub mod users;
