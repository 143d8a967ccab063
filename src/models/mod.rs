//! Data models representing database entities and API payloads.

pub mod academic;
pub mod audit;
pub mod billing;
pub mod billing_type;
pub mod notification;
pub mod payment_method;
pub mod role;
pub mod school;
pub mod student;
/// Payment transactions against billing students
pub mod transaction;
pub mod user;
