use std::sync::Arc;

use async_trait::async_trait;
use flora_core::payment::PaymentProvider;
use flora_core::{money, AuthUser, StoreError};
use flora_order::{OrderError, OrderRepository, OrderService, OrderStatus, Settlement};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{Payment, PaymentStatus, ReconciliationIssue};
use crate::webhook::{Notification, NotificationKind, SignatureError, WebhookVerifier};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),

    #[error("Notification payload could not be parsed: {0}")]
    MalformedPayload(String),

    #[error("Order not found")]
    OrderNotFound,

    #[error("Only draft orders can start payment")]
    OrderNotDraft,

    #[error("Order total must be positive")]
    InvalidAmount,

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Issue not found")]
    IssueNotFound,

    #[error("Not allowed for this requester")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle returned to the client starting a payment.
#[derive(Debug, Clone, Serialize)]
pub struct InitiatedPayment {
    pub tx_ref: String,
    pub client_secret: Option<String>,
}

/// What one webhook delivery did. Every delivery lands in exactly one arm;
/// nothing is silently dropped.
#[derive(Debug)]
pub enum ReconcileOutcome {
    /// Success effects applied for the first time.
    Applied {
        payment_id: Uuid,
        settled_order: Option<Uuid>,
    },
    /// This reference already succeeded; replay acknowledged, no effects.
    AlreadyProcessed,
    /// Payment recorded as succeeded but inventory could not be committed;
    /// flagged for manual review.
    AppliedWithShortfall { payment_id: Uuid, issue_id: Uuid },
    /// Failure notification recorded; the order is untouched and may retry.
    FailureRecorded { payment_id: Uuid },
    /// Unhandled kind, acknowledged and skipped.
    Ignored { kind: String },
}

/// Storage contract for payments. Uniqueness on `(provider, tx_ref)` and the
/// no-downgrade rule are enforced here, atomically with the writes.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a pending payment unless one already exists for the key;
    /// returns the stored row either way.
    async fn upsert_pending(&self, payment: Payment) -> Result<Payment, StoreError>;

    async fn find_by_tx_ref(
        &self,
        provider: &str,
        tx_ref: &str,
    ) -> Result<Option<Payment>, StoreError>;

    /// Move the keyed payment to succeeded, inserting `template` when the
    /// key is unknown. The boolean is true only for the call that actually
    /// performed the move, making it an exactly-once claim under replay.
    async fn claim_success(
        &self,
        provider: &str,
        tx_ref: &str,
        template: Payment,
    ) -> Result<(Payment, bool), StoreError>;

    /// Move the keyed payment to failed, inserting `template` when the key
    /// is unknown. Succeeded payments are never downgraded.
    async fn mark_failed(
        &self,
        provider: &str,
        tx_ref: &str,
        template: Payment,
    ) -> Result<Payment, StoreError>;

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError>;

    async fn record_issue(&self, issue: ReconciliationIssue) -> Result<(), StoreError>;

    async fn open_issues(&self) -> Result<Vec<ReconciliationIssue>, StoreError>;

    async fn resolve_issue(
        &self,
        issue_id: Uuid,
    ) -> Result<Option<ReconciliationIssue>, StoreError>;
}

/// Converts the provider's at-least-once notification feed into exactly-once
/// effects on payments, orders and inventory. The only caller allowed to
/// drive an order from draft to paid.
pub struct PaymentReconciler {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<OrderService>,
    order_repo: Arc<dyn OrderRepository>,
    provider: Arc<dyn PaymentProvider>,
    verifier: WebhookVerifier,
}

impl PaymentReconciler {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        orders: Arc<OrderService>,
        order_repo: Arc<dyn OrderRepository>,
        provider: Arc<dyn PaymentProvider>,
        verifier: WebhookVerifier,
    ) -> Self {
        Self {
            payments,
            orders,
            order_repo,
            provider,
            verifier,
        }
    }

    /// Start a payment attempt for the caller's draft order. Repeated calls
    /// for the same provider reference reuse the pending row.
    pub async fn initiate(
        &self,
        auth: &AuthUser,
        order_id: Uuid,
    ) -> Result<InitiatedPayment, ReconcileError> {
        let order = self
            .order_repo
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == auth.user_id || auth.is_admin())
            .ok_or(ReconcileError::OrderNotFound)?;

        if order.status != OrderStatus::Draft {
            return Err(ReconcileError::OrderNotDraft);
        }
        if order.totals.total <= Decimal::ZERO {
            return Err(ReconcileError::InvalidAmount);
        }

        let amount_minor =
            money::to_minor_units(order.totals.total).ok_or(ReconcileError::InvalidAmount)?;
        let currency = order.currency.to_lowercase();

        let intent = self
            .provider
            .create_intent(order.id, amount_minor, &currency)
            .await
            .map_err(|e| ReconcileError::Provider(e.to_string()))?;

        let pending = Payment::new(
            Some(order.id),
            self.provider.name(),
            PaymentStatus::Pending,
            order.totals.total,
            currency,
            Some(intent.tx_ref.clone()),
        );
        self.payments.upsert_pending(pending).await?;

        tracing::info!(%order_id, tx_ref = %intent.tx_ref, "payment initiated");
        Ok(InitiatedPayment {
            tx_ref: intent.tx_ref,
            client_secret: intent.client_secret,
        })
    }

    /// Apply one provider delivery. Signature verification runs over the
    /// exact raw bytes before anything is parsed; any re-serialization
    /// upstream of this call is a bug.
    pub async fn reconcile(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.verifier.verify(payload, signature_header)?;

        let note: Notification = serde_json::from_slice(payload)
            .map_err(|e| ReconcileError::MalformedPayload(e.to_string()))?;

        match NotificationKind::parse(&note.kind) {
            NotificationKind::PaymentSucceeded => self.apply_success(&note).await,
            NotificationKind::PaymentFailed => self.apply_failure(&note).await,
            NotificationKind::Other(kind) => {
                tracing::info!(%kind, notification = %note.id, "notification kind acknowledged and ignored");
                Ok(ReconcileOutcome::Ignored { kind })
            }
        }
    }

    async fn apply_success(&self, note: &Notification) -> Result<ReconcileOutcome, ReconcileError> {
        let tx_ref = note.data.object.id.as_str();
        let provider = self.provider.name();

        if let Some(existing) = self.payments.find_by_tx_ref(provider, tx_ref).await? {
            if existing.status == PaymentStatus::Succeeded {
                tracing::info!(%tx_ref, "success replay ignored");
                return Ok(ReconcileOutcome::AlreadyProcessed);
            }
        }

        let template = self.template_from(note, PaymentStatus::Succeeded);
        let (payment, first_success) = self
            .payments
            .claim_success(provider, tx_ref, template)
            .await?;
        if !first_success {
            tracing::info!(%tx_ref, "success replay ignored");
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let Some(order_id) = payment.order_id else {
            tracing::warn!(%tx_ref, "succeeded payment references no local order");
            return Ok(ReconcileOutcome::Applied {
                payment_id: payment.id,
                settled_order: None,
            });
        };

        let order = self.order_repo.get_order(order_id).await?;
        match order {
            Some(order) if order.status == OrderStatus::Draft => {
                match self.orders.settle_paid(order_id).await {
                    Ok(Settlement::Completed(order)) => Ok(ReconcileOutcome::Applied {
                        payment_id: payment.id,
                        settled_order: Some(order.id),
                    }),
                    Ok(Settlement::StockShortfall(missing)) => {
                        let detail = serde_json::to_string(&missing)
                            .unwrap_or_else(|_| "stock shortfall".to_string());
                        let issue = ReconciliationIssue::new(payment.id, Some(order_id), detail);
                        let issue_id = issue.id;
                        self.payments.record_issue(issue).await?;
                        tracing::error!(
                            %order_id,
                            payment_id = %payment.id,
                            %issue_id,
                            "payment succeeded but stock commit failed; flagged for manual review"
                        );
                        Ok(ReconcileOutcome::AppliedWithShortfall {
                            payment_id: payment.id,
                            issue_id,
                        })
                    }
                    Err(OrderError::Store(e)) => Err(ReconcileError::Store(e)),
                    Err(e) => {
                        // The order moved under us; the payment stays recorded.
                        tracing::warn!(%order_id, error = %e, "order not settled");
                        Ok(ReconcileOutcome::Applied {
                            payment_id: payment.id,
                            settled_order: None,
                        })
                    }
                }
            }
            _ => Ok(ReconcileOutcome::Applied {
                payment_id: payment.id,
                settled_order: None,
            }),
        }
    }

    async fn apply_failure(&self, note: &Notification) -> Result<ReconcileOutcome, ReconcileError> {
        let tx_ref = note.data.object.id.as_str();
        let template = self.template_from(note, PaymentStatus::Failed);
        let payment = self
            .payments
            .mark_failed(self.provider.name(), tx_ref, template)
            .await?;

        tracing::info!(%tx_ref, payment_id = %payment.id, "payment failure recorded");
        Ok(ReconcileOutcome::FailureRecorded {
            payment_id: payment.id,
        })
    }

    /// Row to insert when a notification references a transaction we never
    /// initiated locally.
    fn template_from(&self, note: &Notification, status: PaymentStatus) -> Payment {
        let object = &note.data.object;
        let amount = object
            .minor_amount()
            .map(money::from_minor_units)
            .unwrap_or(Decimal::ZERO);
        let currency = object
            .currency
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| "EUR".to_string());

        Payment::new(
            object.order_ref(),
            self.provider.name(),
            status,
            amount,
            currency,
            Some(object.id.clone()),
        )
    }

    /// Payments attached to an order, visible to the order's owner and to
    /// administrators only.
    pub async fn payments_for_order(
        &self,
        auth: &AuthUser,
        order_id: Uuid,
    ) -> Result<Vec<Payment>, ReconcileError> {
        let order = self
            .order_repo
            .get_order(order_id)
            .await?
            .ok_or(ReconcileError::OrderNotFound)?;

        if !auth.is_admin() && order.user_id != auth.user_id {
            return Err(ReconcileError::Forbidden);
        }

        Ok(self.payments.payments_for_order(order_id).await?)
    }

    /// Admin: unresolved integrity exceptions awaiting manual stock
    /// reconciliation or refund.
    pub async fn open_issues(
        &self,
        auth: &AuthUser,
    ) -> Result<Vec<ReconciliationIssue>, ReconcileError> {
        if !auth.is_admin() {
            return Err(ReconcileError::Forbidden);
        }
        Ok(self.payments.open_issues().await?)
    }

    pub async fn resolve_issue(
        &self,
        auth: &AuthUser,
        issue_id: Uuid,
    ) -> Result<ReconciliationIssue, ReconcileError> {
        if !auth.is_admin() {
            return Err(ReconcileError::Forbidden);
        }
        self.payments
            .resolve_issue(issue_id)
            .await?
            .ok_or(ReconcileError::IssueNotFound)
    }
}
