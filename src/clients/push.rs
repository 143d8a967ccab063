//! Push notifications through an FCM-style HTTP endpoint.

use async_trait::async_trait;

use crate::models::notification::PushMessage;

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("push API answered {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError>;
}

pub struct HttpPushSender {
    client: reqwest::Client,
    api_url: String,
    server_key: String,
}

impl HttpPushSender {
    pub fn new(api_url: &str, server_key: &str) -> Result<Self, PushError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.to_string(),
            server_key: server_key.to_string(),
        })
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("Authorization", format!("key={}", self.server_key))
            .json(&serde_json::json!({
                "to": message.token,
                "notification": {
                    "title": message.title,
                    "body": message.body,
                },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PushError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod mock {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct MockPushSender {
        pub sent: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushSender for MockPushSender {
        async fn send(&self, message: &PushMessage) -> Result<(), PushError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
