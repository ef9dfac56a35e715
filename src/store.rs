// src/store.rs
// Payment / profile bookkeeping in Supabase (PostgREST) or in memory

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::config::SupabaseConfig;

pub const PAYMENTS_TABLE: &str = "payments";
pub const PROFILES_TABLE: &str = "profiles";
pub const PAYMENT_PROVIDER_ID_COLUMN: &str = "abacatepay_id";
pub const PROFILE_PREMIUM_COLUMN: &str = "is_premium";

pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("store rejected {operation} with status {status}: {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("{0} not found")]
    NotFound(String),
}

/// Local copy of a provider payment.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentRecord {
    pub user_id: String,
    pub status: String,
}

impl PaymentRecord {
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Looks up the payment joined on the provider payment id.
    async fn find_payment(&self, provider_payment_id: &str) -> Result<PaymentRecord, StoreError>;

    async fn mark_payment_completed(&self, provider_payment_id: &str) -> Result<(), StoreError>;

    async fn grant_premium(&self, user_id: &str) -> Result<(), StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUPABASE (POSTGREST)
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct SupabaseStore {
    config: SupabaseConfig,
    http_client: Client,
}

impl SupabaseStore {
    pub fn new(config: SupabaseConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.config.url, table)
    }

    /// Service-role credentials go in both headers PostgREST checks.
    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.config.service_role_key)
            .bearer_auth(&self.config.service_role_key)
    }

    async fn patch(
        &self,
        operation: &'static str,
        table: &str,
        filter: (&str, String),
        body: serde_json::Value,
    ) -> Result<(), StoreError> {
        let resp = self
            .authorized(self.http_client.patch(self.table_url(table)))
            .query(&[filter])
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(StoreError::Rejected {
                operation,
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for SupabaseStore {
    async fn find_payment(&self, provider_payment_id: &str) -> Result<PaymentRecord, StoreError> {
        let resp = self
            .authorized(self.http_client.get(self.table_url(PAYMENTS_TABLE)))
            .query(&[
                (PAYMENT_PROVIDER_ID_COLUMN, format!("eq.{}", provider_payment_id)),
                ("select", "user_id,status".to_string()),
            ])
            .header("Accept", "application/vnd.pgrst.object+json")
            .send()
            .await?;

        let status = resp.status();
        // Single-object requests answer 406 when zero (or several) rows match.
        if status == StatusCode::NOT_ACCEPTABLE {
            return Err(StoreError::NotFound(format!("payment {}", provider_payment_id)));
        }
        if !status.is_success() {
            return Err(StoreError::Rejected {
                operation: "find payment",
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        Ok(resp.json::<PaymentRecord>().await?)
    }

    async fn mark_payment_completed(&self, provider_payment_id: &str) -> Result<(), StoreError> {
        self.patch(
            "update payment",
            PAYMENTS_TABLE,
            (PAYMENT_PROVIDER_ID_COLUMN, format!("eq.{}", provider_payment_id)),
            json!({ "status": STATUS_COMPLETED }),
        )
        .await
    }

    async fn grant_premium(&self, user_id: &str) -> Result<(), StoreError> {
        self.patch(
            "update profile",
            PROFILES_TABLE,
            ("id", format!("eq.{}", user_id)),
            json!({ PROFILE_PREMIUM_COLUMN: true }),
        )
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-local test double; the service itself always runs on
/// [`SupabaseStore`]. Counts writes so tests can assert on side effects.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<String, PaymentRecord>>>,
    premium: Arc<RwLock<HashMap<String, bool>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_payment(&self, provider_payment_id: &str, user_id: &str, status: &str) {
        self.payments.write().await.insert(
            provider_payment_id.to_string(),
            PaymentRecord {
                user_id: user_id.to_string(),
                status: status.to_string(),
            },
        );
        self.premium
            .write()
            .await
            .entry(user_id.to_string())
            .or_insert(false);
    }

    pub async fn payment(&self, provider_payment_id: &str) -> Option<PaymentRecord> {
        self.payments.read().await.get(provider_payment_id).cloned()
    }

    pub async fn is_premium(&self, user_id: &str) -> Option<bool> {
        self.premium.read().await.get(user_id).copied()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn find_payment(&self, provider_payment_id: &str) -> Result<PaymentRecord, StoreError> {
        self.payment(provider_payment_id)
            .await
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", provider_payment_id)))
    }

    async fn mark_payment_completed(&self, provider_payment_id: &str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut payments = self.payments.write().await;
        match payments.get_mut(provider_payment_id) {
            Some(record) => {
                record.status = STATUS_COMPLETED.to_string();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("payment {}", provider_payment_id))),
        }
    }

    async fn grant_premium(&self, user_id: &str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut premium = self.premium.write().await;
        match premium.get_mut(user_id) {
            Some(flag) => {
                *flag = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("profile {}", user_id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> SupabaseStore {
        SupabaseStore::new(
            SupabaseConfig {
                url: server.uri(),
                service_role_key: "service_key".to_string(),
            },
            Client::new(),
        )
    }

    #[tokio::test]
    async fn test_find_payment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/payments"))
            .and(query_param("abacatepay_id", "eq.pix_char_123"))
            .and(query_param("select", "user_id,status"))
            .and(header("apikey", "service_key"))
            .and(header("authorization", "Bearer service_key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "user_id": "user-1", "status": "pending" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let record = store_for(&server).find_payment("pix_char_123").await.unwrap();

        assert_eq!(
            record,
            PaymentRecord {
                user_id: "user-1".to_string(),
                status: "pending".to_string(),
            }
        );
        assert!(!record.is_completed());
    }

    #[tokio::test]
    async fn test_find_payment_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/payments"))
            .respond_with(ResponseTemplate::new(406).set_body_json(json!({ "code": "PGRST116" })))
            .mount(&server)
            .await;

        let err = store_for(&server).find_payment("missing").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_updates() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/payments"))
            .and(query_param("abacatepay_id", "eq.pix_char_123"))
            .and(body_json(json!({ "status": "completed" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", "eq.user-1"))
            .and(body_json(json!({ "is_premium": true })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_for(&server);
        store.mark_payment_completed("pix_char_123").await.unwrap();
        store.grant_premium("user-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_update_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let err = store_for(&server).grant_premium("user-1").await.unwrap_err();
        match err {
            StoreError::Rejected { status, body, .. } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid key");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryPaymentStore::new();
        store.insert_payment("pix_char_123", "user-1", "pending").await;

        store.mark_payment_completed("pix_char_123").await.unwrap();
        store.grant_premium("user-1").await.unwrap();

        assert!(store.payment("pix_char_123").await.unwrap().is_completed());
        assert_eq!(store.is_premium("user-1").await, Some(true));
        assert_eq!(store.write_count(), 2);
        assert!(store.grant_premium("nobody").await.is_err());
    }
}
