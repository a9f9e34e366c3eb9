use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Intent handle returned by the external payment provider. `tx_ref` is the
/// provider's identifier for this attempt and the reconciliation key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderIntent {
    pub tx_ref: String,
    pub client_secret: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Boundary to the external payment provider. Amounts cross this boundary in
/// integer minor units.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider key stored on payment rows, e.g. "stripe".
    fn name(&self) -> &str;

    /// Create a payment intent with the provider
    async fn create_intent(
        &self,
        order_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Result<ProviderIntent, Box<dyn std::error::Error + Send + Sync>>;
}

/// Offline provider for tests and local development. The intent reference is
/// derived from the order id, so repeated initiations hit the same
/// idempotency key just like a real provider retry would.
pub struct MockProvider;

#[async_trait]
impl PaymentProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_intent(
        &self,
        order_id: Uuid,
        amount_minor: i64,
        currency: &str,
    ) -> Result<ProviderIntent, Box<dyn std::error::Error + Send + Sync>> {
        tracing::debug!(%order_id, amount_minor, "issuing mock payment intent");

        Ok(ProviderIntent {
            tx_ref: format!("pi_{}", order_id.simple()),
            client_secret: Some(format!("pi_{}_secret", order_id.simple())),
            amount_minor,
            currency: currency.to_string(),
            created_at: Utc::now(),
        })
    }
}
