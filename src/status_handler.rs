// src/status_handler.rs
// PIX payment status check: provider lookup + premium activation

use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::abacatepay::{is_paid_status, AbacatePayClient, ProviderError, StatusCheck};
use crate::config::{CheckerConfig, ConfigError};
use crate::store::{PaymentStore, StoreError};
use crate::AppState;

pub const GENERIC_INTERNAL_ERROR: &str = "Internal server error";

// ═══════════════════════════════════════════════════════════════════════════════
// REQUEST / RESPONSE PAYLOADS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatusRequest {
    /// Kept loose so a wrong-typed id is reported as a client error.
    pub payment_id: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusBody {
    pub payment_id: String,
    pub status: String,
    pub abacate_pay_data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamErrorBody {
    pub error: String,
    pub details: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Every answer the checker can give.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckResponse {
    Preflight,
    Success(PaymentStatusBody),
    Configuration(ErrorBody),
    Validation(ErrorBody),
    Upstream {
        status_code: u16,
        body: UpstreamErrorBody,
    },
    Internal(InternalErrorBody),
}

impl IntoResponse for CheckResponse {
    fn into_response(self) -> Response {
        match self {
            CheckResponse::Preflight => StatusCode::OK.into_response(),
            CheckResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            CheckResponse::Configuration(body) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            CheckResponse::Validation(body) => (StatusCode::BAD_REQUEST, Json(body)).into_response(),
            CheckResponse::Upstream { status_code, body } => {
                let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, Json(body)).into_response()
            }
            CheckResponse::Internal(body) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),
    #[error("paymentId is required")]
    MissingPaymentId,
    #[error("paymentId must be a string")]
    InvalidPaymentId,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Walks `source()` so the caller sees the whole cause chain.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {}", cause));
        source = cause.source();
    }
    lines.join("\n")
}

// ═══════════════════════════════════════════════════════════════════════════════
// BEST-EFFORT POST-ACTION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotPaid,
    LookupFailed,
    AlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostActionOutcome {
    Skipped(SkipReason),
    Applied {
        payment_updated: bool,
        premium_granted: bool,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct PaymentStatusChecker {
    provider: AbacatePayClient,
    store: Arc<dyn PaymentStore>,
    expose_error_details: bool,
}

impl PaymentStatusChecker {
    pub fn new(provider: AbacatePayClient, store: Arc<dyn PaymentStore>) -> Self {
        Self {
            provider,
            store,
            expose_error_details: false,
        }
    }

    pub fn from_config(
        config: &CheckerConfig,
        http_client: reqwest::Client,
        store: Arc<dyn PaymentStore>,
    ) -> Self {
        Self {
            provider: AbacatePayClient::new(config.abacatepay.clone(), http_client),
            store,
            expose_error_details: config.expose_error_details,
        }
    }

    pub fn with_error_details(mut self, expose: bool) -> Self {
        self.expose_error_details = expose;
        self
    }

    /// Runs one status check for a raw JSON request body.
    pub async fn handle(&self, body: &[u8]) -> CheckResponse {
        match self.check(body).await {
            Ok(response) => response,
            Err(err @ (CheckError::MissingPaymentId | CheckError::InvalidPaymentId)) => {
                tracing::warn!(error = %err, "[CHECK] rejected request");
                CheckResponse::Validation(ErrorBody {
                    error: err.to_string(),
                })
            }
            Err(err) => {
                let chain = error_chain(&err);
                tracing::error!(error = %chain, "[CHECK] unexpected failure");
                let body = if self.expose_error_details {
                    InternalErrorBody {
                        error: err.to_string(),
                        stack: Some(chain),
                    }
                } else {
                    InternalErrorBody {
                        error: GENERIC_INTERNAL_ERROR.to_string(),
                        stack: None,
                    }
                };
                CheckResponse::Internal(body)
            }
        }
    }

    async fn check(&self, body: &[u8]) -> Result<CheckResponse, CheckError> {
        let request: CheckStatusRequest =
            serde_json::from_slice(body).map_err(CheckError::InvalidBody)?;
        let payment_id = match request.payment_id {
            None | Some(Value::Null) => return Err(CheckError::MissingPaymentId),
            Some(Value::String(id)) if id.is_empty() => return Err(CheckError::MissingPaymentId),
            Some(Value::String(id)) => id,
            Some(_) => return Err(CheckError::InvalidPaymentId),
        };

        tracing::info!(%payment_id, "[CHECK] checking payment status");

        let (status, payload) = match self.provider.check_pix_qr_code(&payment_id).await? {
            StatusCheck::Reported { status, payload } => (status, payload),
            StatusCheck::Rejected {
                status_code,
                message,
                details,
            } => {
                return Ok(CheckResponse::Upstream {
                    status_code,
                    body: UpstreamErrorBody {
                        error: message,
                        details,
                    },
                });
            }
        };

        let outcome = self.complete_payment(&payment_id, &status).await;
        tracing::info!(%payment_id, %status, ?outcome, "[CHECK] done");

        Ok(CheckResponse::Success(PaymentStatusBody {
            payment_id,
            status,
            abacate_pay_data: payload,
        }))
    }

    /// Marks the local payment completed and grants premium. Never fails;
    /// write errors are logged and reflected in the outcome only.
    pub async fn complete_payment(&self, payment_id: &str, provider_status: &str) -> PostActionOutcome {
        if !is_paid_status(provider_status) {
            return PostActionOutcome::Skipped(SkipReason::NotPaid);
        }

        let record = match self.store.find_payment(payment_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(payment_id, error = %e, "[STORE] payment lookup failed, skipping update");
                return PostActionOutcome::Skipped(SkipReason::LookupFailed);
            }
        };

        if record.is_completed() {
            tracing::info!(payment_id, "[STORE] payment already completed");
            return PostActionOutcome::Skipped(SkipReason::AlreadyCompleted);
        }

        let payment_updated = log_write(
            "update payment",
            payment_id,
            self.store.mark_payment_completed(payment_id).await,
        );
        let premium_granted = log_write(
            "grant premium",
            &record.user_id,
            self.store.grant_premium(&record.user_id).await,
        );

        if payment_updated && premium_granted {
            log_premium_activation(payment_id, &record.user_id);
        }

        PostActionOutcome::Applied {
            payment_updated,
            premium_granted,
        }
    }
}

fn log_write(operation: &str, key: &str, result: Result<(), StoreError>) -> bool {
    match result {
        Ok(()) => {
            tracing::info!(operation, key, "[STORE] write applied");
            true
        }
        Err(e) => {
            tracing::error!(operation, key, error = %e, "[STORE] write failed");
            false
        }
    }
}

fn log_premium_activation(payment_id: &str, user_id: &str) {
    tracing::info!(
        target: "audit",
        payment_id,
        user_id,
        activated_at = %Utc::now().to_rfc3339(),
        "[AUDIT] premium activated"
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn configuration_error(err: &ConfigError) -> CheckResponse {
    CheckResponse::Configuration(ErrorBody {
        error: err.to_string(),
    })
}

/// Accepts any method; OPTIONS is answered as a CORS preflight.
pub async fn check_payment_status_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    body: Bytes,
) -> CheckResponse {
    if method == Method::OPTIONS {
        return CheckResponse::Preflight;
    }

    let checker = match &state.checker {
        Ok(checker) => checker,
        Err(e) => {
            tracing::error!(error = %e, "[CHECK] refusing request, configuration incomplete");
            return configuration_error(e);
        }
    };

    let span = tracing::info_span!("payment_status_check", request_id = %Uuid::new_v4());
    checker.handle(&body).instrument(span).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPaymentStore;
    use crate::config::AbacatePayConfig;

    fn checker_with(store: InMemoryPaymentStore) -> PaymentStatusChecker {
        // Provider is never reached by these tests.
        let provider = AbacatePayClient::new(
            AbacatePayConfig {
                api_key: "unused".to_string(),
                api_url: "http://127.0.0.1:9".to_string(),
            },
            reqwest::Client::new(),
        );
        PaymentStatusChecker::new(provider, Arc::new(store))
    }

    #[tokio::test]
    async fn test_complete_payment_applies_both_writes() {
        let store = InMemoryPaymentStore::new();
        store.insert_payment("pix_1", "user-1", "pending").await;

        let outcome = checker_with(store.clone()).complete_payment("pix_1", "PAID").await;

        assert_eq!(
            outcome,
            PostActionOutcome::Applied {
                payment_updated: true,
                premium_granted: true,
            }
        );
        assert!(store.payment("pix_1").await.unwrap().is_completed());
        assert_eq!(store.is_premium("user-1").await, Some(true));
    }

    #[tokio::test]
    async fn test_complete_payment_skips() {
        let store = InMemoryPaymentStore::new();
        store.insert_payment("pix_done", "user-2", "completed").await;
        let checker = checker_with(store.clone());

        assert_eq!(
            checker.complete_payment("pix_done", "PENDING").await,
            PostActionOutcome::Skipped(SkipReason::NotPaid)
        );
        assert_eq!(
            checker.complete_payment("pix_unknown", "PAID").await,
            PostActionOutcome::Skipped(SkipReason::LookupFailed)
        );
        assert_eq!(
            checker.complete_payment("pix_done", "completed").await,
            PostActionOutcome::Skipped(SkipReason::AlreadyCompleted)
        );
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_payment_id_is_validation_error() {
        let checker = checker_with(InMemoryPaymentStore::new());

        let bodies: [&[u8]; 3] = [b"{}", br#"{"paymentId":null}"#, br#"{"paymentId":""}"#];
        for body in bodies {
            let response = checker.handle(body).await;
            assert!(matches!(response, CheckResponse::Validation(_)));
        }
    }

    #[tokio::test]
    async fn test_non_string_payment_id_is_validation_error() {
        let checker = checker_with(InMemoryPaymentStore::new());

        let bodies: [&[u8]; 3] = [br#"{"paymentId":123}"#, br#"{"paymentId":true}"#, br#"{"paymentId":["pix_1"]}"#];
        for body in bodies {
            match checker.handle(body).await {
                CheckResponse::Validation(body) => assert_eq!(body.error, "paymentId must be a string"),
                other => panic!("unexpected response: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_internal_error() {
        let checker = checker_with(InMemoryPaymentStore::new());

        match checker.handle(b"not json").await {
            CheckResponse::Internal(body) => {
                assert_eq!(body.error, GENERIC_INTERNAL_ERROR);
                assert!(body.stack.is_none());
            }
            other => panic!("unexpected response: {:?}", other),
        }

        match checker.with_error_details(true).handle(b"not json").await {
            CheckResponse::Internal(body) => {
                assert!(body.error.starts_with("Invalid request body"));
                assert!(body.stack.unwrap().contains("caused by"));
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
