//! Outbound email queue drained by a small pool of paced workers.
//!
//! Producers push [`EmailMessage`]s into a bounded channel and wait when it
//! is full. A fixed number of workers share the receiver; each one sends a
//! message, logs and skips failures, then sleeps for the pacing delay so the
//! mail provider's rate limit is respected. There is no ordering guarantee
//! across workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::clients::mailer::Mailer;
use crate::error::AppError;
use crate::models::notification::EmailMessage;

#[derive(Clone)]
pub struct EmailDispatcher {
    sender: mpsc::Sender<EmailMessage>,
}

impl EmailDispatcher {
    /// Spawn `workers` tasks and return the producer handle.
    ///
    /// Workers exit once every `EmailDispatcher` clone is dropped and the
    /// queue is drained.
    pub fn start(
        mailer: Arc<dyn Mailer>,
        workers: usize,
        pacing: Duration,
        queue_size: usize,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(queue_size);
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    receiver.clone(),
                    mailer.clone(),
                    pacing,
                ))
            })
            .collect();

        (Self { sender }, handles)
    }

    /// Queue one message, waiting for room when the queue is full.
    pub async fn enqueue(&self, message: EmailMessage) -> Result<(), AppError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| AppError::Internal("email queue is closed".to_string()))
    }

    /// Queue several messages; returns how many were accepted.
    pub async fn enqueue_all(&self, messages: impl IntoIterator<Item = EmailMessage>) -> usize {
        let mut queued = 0;
        for message in messages {
            if let Err(e) = self.enqueue(message).await {
                tracing::error!(error = %e, "stopped queueing emails");
                break;
            }
            queued += 1;
        }
        queued
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<EmailMessage>>>,
    mailer: Arc<dyn Mailer>,
    pacing: Duration,
) {
    tracing::debug!(worker_id, "email worker started");
    loop {
        // Hold the lock only while waiting for the next message
        let next = { receiver.lock().await.recv().await };
        let Some(message) = next else {
            break;
        };

        match mailer.send(&message).await {
            Ok(()) => tracing::debug!(worker_id, to = %message.to, "email sent"),
            Err(e) => {
                tracing::warn!(worker_id, to = %message.to, error = %e, "email delivery failed");
            }
        }

        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }
    tracing::debug!(worker_id, "email worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::mailer::mock::MockMailer;

    fn message(to: &str) -> EmailMessage {
        EmailMessage {
            to: to.to_string(),
            subject: "Verify your email".to_string(),
            body: "hello".to_string(),
        }
    }

    #[tokio::test]
    async fn drains_queue_and_skips_failures() {
        let mailer = Arc::new(MockMailer {
            failing: vec!["bounce@example.com".to_string()],
            ..Default::default()
        });
        let (dispatcher, workers) = EmailDispatcher::start(mailer.clone(), 2, Duration::ZERO, 4);

        let queued = dispatcher
            .enqueue_all(vec![
                message("a@example.com"),
                message("bounce@example.com"),
                message("b@example.com"),
                message("c@example.com"),
                message("d@example.com"),
            ])
            .await;
        assert_eq!(queued, 5);

        drop(dispatcher);
        for worker in workers {
            worker.await.unwrap();
        }

        let mut sent: Vec<String> = mailer
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.to.clone())
            .collect();
        sent.sort();
        assert_eq!(
            sent,
            vec!["a@example.com", "b@example.com", "c@example.com", "d@example.com"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn workers_pace_between_messages() {
        let mailer = Arc::new(MockMailer::default());
        let (dispatcher, workers) =
            EmailDispatcher::start(mailer.clone(), 1, Duration::from_secs(1), 8);

        let started = tokio::time::Instant::now();
        dispatcher
            .enqueue_all((0..3).map(|i| message(&format!("u{i}@example.com"))))
            .await;
        drop(dispatcher);
        for worker in workers {
            worker.await.unwrap();
        }

        assert_eq!(mailer.sent.lock().unwrap().len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
