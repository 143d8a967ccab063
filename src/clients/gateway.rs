//! Payment gateway client.
//!
//! The gateway speaks a Snap-style API: a charge is created with an order id
//! and gross amount and answers with a payment token plus a redirect URL;
//! statuses are read back per order id and pushed to our webhook.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::models::transaction::GatewayNotification;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The gateway has no record of the order id.
    #[error("order not found")]
    NotFound,
}

/// A charge request for one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeRequest {
    pub order_id: String,
    pub gross_amount: i64,
    pub payment_type: String,
    pub bank_code: Option<String>,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub expiry_minutes: i64,
    pub items: Vec<ChargeItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeItem {
    pub id: String,
    pub name: String,
    pub price: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeResponse {
    pub token: String,
    pub redirect_url: String,
}

/// Everything the payment workflow needs from the gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError>;

    async fn fetch_status(&self, order_id: &str) -> Result<GatewayNotification, GatewayError>;

    /// Server key shared with the gateway, used to verify notification signatures.
    fn server_key(&self) -> &str;
}

/// Compute the notification signature:
/// hex(sha512(order_id + status_code + gross_amount + server_key)).
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Check a notification's `signature_key` against the server key.
pub fn verify_notification(notification: &GatewayNotification, server_key: &str) -> bool {
    let expected = notification_signature(
        &notification.order_id,
        &notification.status_code,
        &notification.gross_amount,
        server_key,
    );
    constant_time_eq(
        expected.as_bytes(),
        notification.signature_key.to_ascii_lowercase().as_bytes(),
    )
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Parse a gateway gross amount ("355000.00") into whole rupiah.
pub fn parse_gross_amount(raw: &str) -> Option<i64> {
    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if !fraction.chars().all(|c| c == '0') {
        return None;
    }
    whole.parse().ok()
}

/// HTTP implementation using the gateway's REST API with basic auth.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    server_key: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, server_key: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            server_key: server_key.to_string(),
        })
    }

    async fn read_error(response: reqwest::Response) -> GatewayError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        GatewayError::Rejected { status, body }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeResponse, GatewayError> {
        let mut body = serde_json::json!({
            "transaction_details": {
                "order_id": request.order_id,
                "gross_amount": request.gross_amount,
            },
            "item_details": request.items,
            "customer_details": {
                "first_name": request.customer_name,
                "email": request.customer_email,
            },
            "enabled_payments": [request.payment_type],
            "expiry": {
                "unit": "minutes",
                "duration": request.expiry_minutes,
            },
        });
        if let Some(bank) = &request.bank_code {
            body["bank_transfer"] = serde_json::json!({ "bank": bank.to_ascii_lowercase() });
        }

        let response = self
            .client
            .post(format!("{}/snap/v1/transactions", self.base_url))
            .basic_auth(&self.server_key, Some(""))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }
        Ok(response.json::<ChargeResponse>().await?)
    }

    async fn fetch_status(&self, order_id: &str) -> Result<GatewayNotification, GatewayError> {
        let encoded: String = url::form_urlencoded::byte_serialize(order_id.as_bytes()).collect();
        let response = self
            .client
            .get(format!("{}/v2/{}/status", self.base_url, encoded))
            .basic_auth(&self.server_key, Some(""))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound);
        }
        if !response.status().is_success() {
            return Err(Self::read_error(response).await);
        }

        let notification = response.json::<GatewayNotification>().await?;
        // The status API answers 200 with a 404 status_code for unknown orders
        if notification.status_code == "404" {
            return Err(GatewayError::NotFound);
        }
        Ok(notification)
    }

    fn server_key(&self) -> &str {
        &self.server_key
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MOCK_SERVER_KEY, signed_notification};
    use super::*;

    #[test]
    fn accepts_correctly_signed_notification() {
        let n = signed_notification("INV/SDN01/20250710/00001", "settlement", "355000.00");
        assert!(verify_notification(&n, MOCK_SERVER_KEY));
    }

    #[test]
    fn rejects_tampered_amount() {
        let mut n = signed_notification("INV/SDN01/20250710/00001", "settlement", "355000.00");
        n.gross_amount = "1000.00".to_string();
        assert!(!verify_notification(&n, MOCK_SERVER_KEY));
    }

    #[test]
    fn rejects_wrong_server_key() {
        let n = signed_notification("INV/X/20250101/00002", "pending", "10000.00");
        assert!(!verify_notification(&n, "other-key"));
    }

    #[test]
    fn signature_is_sha512_hex() {
        let sig = notification_signature("a", "200", "1.00", "k");
        assert_eq!(sig.len(), 128);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn parses_gross_amounts() {
        assert_eq!(parse_gross_amount("355000.00"), Some(355_000));
        assert_eq!(parse_gross_amount("355000"), Some(355_000));
        assert_eq!(parse_gross_amount("10.50"), None);
        assert_eq!(parse_gross_amount("abc"), None);
    }
}
