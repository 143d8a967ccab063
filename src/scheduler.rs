//! Background jobs: gateway polling for stale pending payments and due-date
//! reminders. Each job runs on its own interval; a failed run is logged and
//! the next tick tries again.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::services::{notification_service, payment_service};
use crate::state::AppState;

pub fn spawn(state: AppState) -> Vec<JoinHandle<()>> {
    let poll_every = Duration::from_secs(state.config.payment_poll_interval_secs);
    let remind_every = Duration::from_secs(state.config.reminder_interval_secs);

    vec![
        tokio::spawn(payment_poller(state.clone(), poll_every)),
        tokio::spawn(due_reminder(state, remind_every)),
    ]
}

async fn payment_poller(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let min_age = state.config.payment_poll_min_age_minutes;
        if let Err(e) = payment_service::poll_pending_transactions(&state, min_age).await {
            tracing::error!(error = %e, "payment poll failed");
        }
    }
}

async fn due_reminder(state: AppState, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so restarts don't re-run the job
    interval.tick().await;
    loop {
        interval.tick().await;
        let days_before = state.config.reminder_days_before;
        if let Err(e) = notification_service::send_due_reminders(&state, days_before).await {
            tracing::error!(error = %e, "due reminders failed");
        }
    }
}
