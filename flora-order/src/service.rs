use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flora_catalog::{CatalogProvider, LineDemand, Shortfall, StockCommit, StockLedger};
use flora_core::address::AddressProvider;
use flora_core::{money, AuthUser, Page, PageRequest, StoreError};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::lifecycle::can_transition;
use crate::models::{Order, OrderLine, OrderStatus, Totals};

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found")]
    OrderNotFound,

    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Address not found")]
    AddressNotFound,

    #[error("An order needs at least one line")]
    EmptyOrder,

    #[error("Line quantity must be at least 1")]
    InvalidQuantity,

    #[error("Discount cannot be negative")]
    InvalidDiscount,

    #[error("Invalid order transition from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Orders become paid through payment settlement, not a status update")]
    PaidRequiresSettlement,

    #[error("Admin role required")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of the paid settlement. A shortfall leaves the order in draft and
/// the ledger untouched; the caller records it for manual review.
#[derive(Debug)]
pub enum Settlement {
    Completed(Order),
    StockShortfall(Vec<Shortfall>),
}

/// One requested line of a new order. Name and price are resolved from the
/// catalog, never taken from the request.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub variant_code: Option<String>,
    pub qty: i32,
    pub discount: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub lines: Vec<NewOrderLine>,
    pub currency: Option<String>,
    pub shipping_fee: Option<Decimal>,
    pub shipping_address_id: Option<Uuid>,
    pub billing_address_id: Option<Uuid>,
    pub delivery_requested_at: Option<DateTime<Utc>>,
    pub card_message: Option<String>,
}

/// Pricing rules the order machine is configured with.
#[derive(Debug, Clone)]
pub struct OrderPolicy {
    pub tax_rate: Decimal,
    pub default_currency: String,
    pub default_shipping_fee: Decimal,
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert_order(&self, order: Order) -> Result<Order, StoreError>;

    async fn get_order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn orders_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError>;

    async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        user_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Page<Order>, StoreError>;

    async fn set_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<Option<Order>, StoreError>;
}

/// Owns the order lifecycle: creation with catalog/address snapshots, the
/// transition table, and the paid settlement that commits inventory.
pub struct OrderService {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn CatalogProvider>,
    addresses: Arc<dyn AddressProvider>,
    ledger: Arc<StockLedger>,
    policy: OrderPolicy,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn CatalogProvider>,
        addresses: Arc<dyn AddressProvider>,
        ledger: Arc<StockLedger>,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            orders,
            catalog,
            addresses,
            ledger,
            policy,
        }
    }

    /// Create a draft order: resolve name and unit price snapshots for every
    /// line, resolve owned address snapshots, compute totals once.
    pub async fn create(&self, auth: &AuthUser, new: NewOrder) -> Result<Order, OrderError> {
        if new.lines.is_empty() {
            return Err(OrderError::EmptyOrder);
        }

        let mut lines = Vec::with_capacity(new.lines.len());
        for requested in &new.lines {
            if requested.qty < 1 {
                return Err(OrderError::InvalidQuantity);
            }
            let discount = requested.discount.unwrap_or(Decimal::ZERO);
            if discount < Decimal::ZERO {
                return Err(OrderError::InvalidDiscount);
            }

            let item = self
                .catalog
                .get_item(requested.product_id)
                .await?
                .ok_or(OrderError::ProductNotFound(requested.product_id))?;

            lines.push(OrderLine {
                product_id: requested.product_id,
                variant_code: requested.variant_code.clone(),
                name: item.name.clone(),
                qty: requested.qty,
                unit_price: item.unit_price(requested.variant_code.as_deref()),
                discount,
            });
        }

        let shipping_address = self
            .resolve_address(auth.user_id, new.shipping_address_id)
            .await?;
        let billing_address = self
            .resolve_address(auth.user_id, new.billing_address_id)
            .await?;

        let shipping = money::round_cents(
            new.shipping_fee
                .unwrap_or(self.policy.default_shipping_fee),
        );
        let totals = Totals::compute(&lines, shipping, self.policy.tax_rate);

        let order = Order::new(
            auth.user_id,
            new.currency
                .unwrap_or_else(|| self.policy.default_currency.clone()),
            totals,
            lines,
            shipping_address,
            billing_address,
            new.delivery_requested_at,
            new.card_message,
        );

        let order = self.orders.insert_order(order).await?;
        tracing::info!(order_id = %order.id, total = %order.totals.total, "order created");
        Ok(order)
    }

    /// Admin lifecycle step over the transition table. The draft->paid edge
    /// is reserved for payment settlement and refused here.
    pub async fn transition(
        &self,
        auth: &AuthUser,
        order_id: Uuid,
        target: OrderStatus,
    ) -> Result<Order, OrderError> {
        if !auth.is_admin() {
            return Err(OrderError::Forbidden);
        }
        if target == OrderStatus::Paid {
            return Err(OrderError::PaidRequiresSettlement);
        }

        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        if !can_transition(order.status, target) {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: target,
            });
        }

        self.orders
            .set_status(order_id, target)
            .await?
            .ok_or(OrderError::OrderNotFound)
    }

    /// Take a draft order to paid, committing the ledger for every line in
    /// one atomic unit. Called by payment settlement once a payment has been
    /// recorded as succeeded; a shortfall leaves the order in draft with
    /// nothing decremented, and is the caller's to surface.
    pub async fn settle_paid(&self, order_id: Uuid) -> Result<Settlement, OrderError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)?;

        if order.status != OrderStatus::Draft {
            return Err(OrderError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Paid,
            });
        }

        let demands: Vec<LineDemand> = order
            .lines
            .iter()
            .map(|line| LineDemand {
                product_id: line.product_id,
                variant_code: flora_catalog::stock::variant_or_base(line.variant_code.as_deref()),
                qty: line.qty,
            })
            .collect();

        match self.ledger.commit_demands(&demands).await? {
            StockCommit::Committed => {
                let order = self
                    .orders
                    .set_status(order_id, OrderStatus::Paid)
                    .await?
                    .ok_or(OrderError::OrderNotFound)?;
                tracing::info!(%order_id, "order paid, inventory committed");
                Ok(Settlement::Completed(order))
            }
            StockCommit::Short(missing) => {
                tracing::error!(
                    %order_id,
                    lines = missing.len(),
                    "inventory could not be committed for a settled payment; order left in draft"
                );
                Ok(Settlement::StockShortfall(missing))
            }
        }
    }

    pub async fn my_orders(
        &self,
        auth: &AuthUser,
        page: PageRequest,
    ) -> Result<Page<Order>, OrderError> {
        Ok(self.orders.orders_for_user(auth.user_id, page).await?)
    }

    pub async fn get_my_order(&self, auth: &AuthUser, order_id: Uuid) -> Result<Order, OrderError> {
        self.orders
            .get_order(order_id)
            .await?
            .filter(|order| order.user_id == auth.user_id)
            .ok_or(OrderError::OrderNotFound)
    }

    pub async fn get_order(&self, auth: &AuthUser, order_id: Uuid) -> Result<Order, OrderError> {
        if !auth.is_admin() {
            return Err(OrderError::Forbidden);
        }
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound)
    }

    pub async fn list_orders(
        &self,
        auth: &AuthUser,
        status: Option<OrderStatus>,
        user_id: Option<Uuid>,
        page: PageRequest,
    ) -> Result<Page<Order>, OrderError> {
        if !auth.is_admin() {
            return Err(OrderError::Forbidden);
        }
        Ok(self.orders.list_orders(status, user_id, page).await?)
    }

    async fn resolve_address(
        &self,
        user_id: Uuid,
        address_id: Option<Uuid>,
    ) -> Result<Option<flora_core::address::AddressSnapshot>, OrderError> {
        match address_id {
            Some(id) => self
                .addresses
                .get_owned_address(user_id, id)
                .await?
                .map(Some)
                .ok_or(OrderError::AddressNotFound),
            None => Ok(None),
        }
    }
}
