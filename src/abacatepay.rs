// src/abacatepay.rs
// AbacatePay PIX QR-code status client

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;

use crate::config::AbacatePayConfig;

pub const FALLBACK_ERROR_MESSAGE: &str = "Failed to check payment status";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("AbacatePay request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("AbacatePay returned an invalid JSON body: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("AbacatePay response has no status field")]
    MissingStatus,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATUS CHECK RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// What the provider said about one payment.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusCheck {
    /// 2xx answer carrying a status.
    Reported { status: String, payload: Value },
    /// Non-2xx answer, forwarded to the caller as-is.
    Rejected {
        status_code: u16,
        message: String,
        details: Value,
    },
}

/// `PAID` and `COMPLETED` (any case) mean the money arrived.
pub fn is_paid_status(status: &str) -> bool {
    status.eq_ignore_ascii_case("paid") || status.eq_ignore_ascii_case("completed")
}

/// Reads `data.status`, falling back to a top-level `status`.
pub fn extract_status(payload: &Value) -> Option<&str> {
    payload
        .get("data")
        .and_then(|d| d.get("status"))
        .and_then(Value::as_str)
        .or_else(|| payload.get("status").and_then(Value::as_str))
}

fn rejection_message(details: &Value) -> String {
    ["error", "message"]
        .iter()
        .find_map(|key| details.get(*key).and_then(Value::as_str))
        .filter(|m| !m.is_empty())
        .unwrap_or(FALLBACK_ERROR_MESSAGE)
        .to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct AbacatePayClient {
    config: AbacatePayConfig,
    http_client: Client,
}

impl AbacatePayClient {
    pub fn new(config: AbacatePayConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    pub async fn check_pix_qr_code(&self, payment_id: &str) -> Result<StatusCheck, ProviderError> {
        let url = format!("{}/pixQrCode/check", self.config.api_url);

        tracing::info!(payment_id, %url, "[ABACATEPAY] checking PIX QR code status");

        let resp = self
            .http_client
            .get(&url)
            .query(&[("id", payment_id)])
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status_code = resp.status();
        let raw = resp.text().await?;

        if !status_code.is_success() {
            let details = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));
            let message = rejection_message(&details);
            tracing::warn!(
                payment_id,
                status = status_code.as_u16(),
                %message,
                "[ABACATEPAY] status check rejected"
            );
            return Ok(StatusCheck::Rejected {
                status_code: status_code.as_u16(),
                message,
                details,
            });
        }

        let payload: Value = serde_json::from_str(&raw).map_err(ProviderError::InvalidBody)?;
        let status = extract_status(&payload)
            .ok_or(ProviderError::MissingStatus)?
            .to_string();

        tracing::info!(payment_id, %status, "[ABACATEPAY] status reported");

        Ok(StatusCheck::Reported { status, payload })
    }
}
