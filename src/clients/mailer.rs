//! Outbound email through an HTTP mail API.

use async_trait::async_trait;

use crate::models::notification::EmailMessage;

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("mail API answered {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

/// Posts `{from, to, subject, text}` JSON with a bearer API key.
pub struct HttpMailer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpMailer {
    pub fn new(api_url: &str, api_key: &str, from: &str) -> Result<Self, MailError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "from": self.from,
                "to": message.to,
                "subject": message.subject,
                "text": message.body,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MailError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    /// Records sent messages; addresses listed in `failing` error out.
    #[derive(Default)]
    pub struct MockMailer {
        pub sent: Mutex<Vec<EmailMessage>>,
        pub failing: Vec<String>,
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
            if self.failing.contains(&message.to) {
                return Err(MailError::Rejected(550));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
