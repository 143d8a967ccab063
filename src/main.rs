//! School Payment Server - Main Application Entry Point
//!
//! A multi-tenant REST API for school payment administration: schools,
//! students and their guardians, billings with per-student installments,
//! payments through a third-party gateway, and email/push notifications.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: JWT bearer tokens, argon2 password hashes
//! - **Outbound**: payment gateway, mail and push providers over HTTP
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Create the bootstrap super admin if configured
//! 4. Start the email workers and background jobs
//! 5. Build the HTTP router and start serving

mod clients;
mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod pagination;
mod routes;
mod scheduler;
mod services;
mod state;

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::clients::{gateway::HttpPaymentGateway, mailer::HttpMailer, push::HttpPushSender};
use crate::services::email_dispatcher::EmailDispatcher;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    services::auth_service::bootstrap_super_admin(&pool, &config).await?;

    let gateway = HttpPaymentGateway::new(
        &config.payment_gateway_url,
        &config.payment_gateway_server_key,
    )?;
    let mailer = HttpMailer::new(&config.mail_api_url, &config.mail_api_key, &config.mail_from)?;
    let push = HttpPushSender::new(&config.push_api_url, &config.push_server_key)?;

    let (email, _email_workers) = EmailDispatcher::start(
        Arc::new(mailer),
        config.email_workers,
        Duration::from_millis(config.email_pacing_ms),
        config.email_queue_size,
    );
    tracing::info!(workers = config.email_workers, "Email workers started");

    let port = config.server_port;
    let state = AppState {
        pool,
        config: Arc::new(config),
        gateway: Arc::new(gateway),
        push: Arc::new(push),
        email,
    };

    let _jobs = scheduler::spawn(state.clone());
    tracing::info!("Background jobs started");

    let app = routes::router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
