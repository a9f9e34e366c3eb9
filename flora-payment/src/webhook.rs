use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Single opaque verification failure. A bad header, a stale timestamp and a
/// wrong digest are indistinguishable to the caller.
#[derive(Debug, thiserror::Error)]
#[error("Webhook signature verification failed")]
pub struct SignatureError;

/// Verifies provider notifications against the shared webhook secret. The
/// signature covers the exact raw body bytes, prefixed with the timestamp
/// token from the header: `HMAC-SHA256(secret, "{t}.{body}")`, hex-encoded
/// in one or more `v1=` entries of a `t=...,v1=...` header.
pub struct WebhookVerifier {
    secret: String,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_seconds: i64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds,
        }
    }

    /// Verify a delivery. Must run before any parsing of `payload`.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), SignatureError> {
        self.verify_at(Utc::now(), payload, signature_header)
    }

    fn verify_at(
        &self,
        now: DateTime<Utc>,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), SignatureError> {
        let mut timestamp: Option<&str> = None;
        let mut candidates: Vec<&str> = Vec::new();

        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError)?;
        if candidates.is_empty() {
            return Err(SignatureError);
        }

        let seconds: i64 = timestamp.parse().map_err(|_| SignatureError)?;
        if (now.timestamp() - seconds).abs() > self.tolerance_seconds {
            return Err(SignatureError);
        }

        let expected = self.expected_signature(timestamp, payload);
        let matched = candidates.iter().any(|candidate| {
            constant_time_eq(candidate.to_ascii_lowercase().as_bytes(), expected.as_bytes())
        });
        if matched {
            Ok(())
        } else {
            Err(SignatureError)
        }
    }

    fn expected_signature(&self, timestamp: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts keys of any length");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex_digest(mac.finalize().into_bytes().as_slice())
    }
}

/// Produce the signature header for a payload, as the provider would. Used by
/// tests and local delivery simulation.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!(
        "t={},v1={}",
        timestamp,
        hex_digest(mac.finalize().into_bytes().as_slice())
    )
}

fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Raw notification envelope, parsed only after the signature verifies.
#[derive(Debug, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: NotificationData,
}

#[derive(Debug, Deserialize)]
pub struct NotificationData {
    pub object: IntentObject,
}

/// The provider's view of one payment intent.
#[derive(Debug, Deserialize)]
pub struct IntentObject {
    pub id: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: IntentMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct IntentMetadata {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl IntentObject {
    /// Minor units reported for the intent, preferring the captured amount.
    pub fn minor_amount(&self) -> Option<i64> {
        self.amount_received.or(self.amount)
    }

    /// The order this intent was initiated for, when the metadata carries a
    /// well-formed reference.
    pub fn order_ref(&self) -> Option<Uuid> {
        self.metadata
            .order_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Notification kinds this core acts on. Everything else is acknowledged and
/// ignored explicitly, never dropped in a fallthrough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentSucceeded,
    PaymentFailed,
    Other(String),
}

impl NotificationKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "payment_intent.succeeded" => NotificationKind::PaymentSucceeded,
            "payment_intent.payment_failed" => NotificationKind::PaymentFailed,
            other => NotificationKind::Other(other.to_string()),
        }
    }
}
