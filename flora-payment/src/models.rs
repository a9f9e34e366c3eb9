use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider-reported state of one payment attempt. Never downgrades from
/// succeeded, whatever order notifications arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PaymentStatus::Pending),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// One payment attempt against an order. `(provider, tx_ref)` is unique when
/// the reference is present and is the reconciliation idempotency key. An
/// order may accumulate several attempts; a validly-signed notification for
/// a transaction we never initiated is still recorded, without an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Option<Uuid>,
    pub provider: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    pub tx_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        order_id: Option<Uuid>,
        provider: &str,
        status: PaymentStatus,
        amount: Decimal,
        currency: String,
        tx_ref: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            provider: provider.to_string(),
            status,
            amount,
            currency,
            tx_ref,
            created_at: now,
            updated_at: now,
        }
    }
}

/// First-class record of the "payment applied, inventory pending" state: a
/// succeeded payment whose order could not commit stock. Surfaced to
/// operators; resolved manually, never automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationIssue {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub order_id: Option<Uuid>,
    pub detail: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

impl ReconciliationIssue {
    pub fn new(payment_id: Uuid, order_id: Option<Uuid>, detail: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            order_id,
            detail,
            resolved: false,
            created_at: Utc::now(),
        }
    }
}
