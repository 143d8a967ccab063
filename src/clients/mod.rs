//! HTTP clients for external collaborators, each behind a trait.

pub mod gateway;
pub mod mailer;
pub mod push;
