pub mod models;
pub mod reconciler;
pub mod webhook;

pub use models::{Payment, PaymentStatus, ReconciliationIssue};
pub use reconciler::{
    InitiatedPayment, PaymentReconciler, PaymentRepository, ReconcileError, ReconcileOutcome,
};
pub use webhook::{Notification, NotificationKind, SignatureError, WebhookVerifier};
