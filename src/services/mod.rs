//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and complex operations.

pub mod academic_service;
pub mod auth_service;
pub mod billing_service;
pub mod billing_type_service;
pub mod email_dispatcher;
pub mod import_service;
pub mod master_data_service;
pub mod notification_service;
pub mod payment_method_service;
pub mod payment_service;
pub mod report_service;
pub mod role_service;
pub mod school_service;
pub mod student_service;
pub mod user_service;
pub mod validation;
