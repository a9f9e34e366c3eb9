use chrono::{DateTime, Utc};
use flora_core::address::AddressSnapshot;
use flora_core::money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status in the lifecycle. Serialized lowercase, matching the wire
/// values the rest of the shop speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Paid,
    Preparing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Paid => "paid",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(OrderStatus::Draft),
            "paid" => Some(OrderStatus::Paid),
            "preparing" => Some(OrderStatus::Preparing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

/// Money breakdown of an order, fixed at creation. The committed price never
/// changes, even when catalog prices do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub shipping: Decimal,
}

impl Totals {
    /// `subtotal = sum(qty x unit_price)`, `total = subtotal + shipping`,
    /// tax derived from the total at the given rate: `net = total / (1+r)`
    /// rounded half-up to cents, `tax = total - net`.
    pub fn compute(lines: &[OrderLine], shipping: Decimal, tax_rate: Decimal) -> Totals {
        let subtotal = money::round_cents(
            lines
                .iter()
                .map(|line| Decimal::from(line.qty) * line.unit_price)
                .sum::<Decimal>(),
        );
        let total = money::round_cents(subtotal + shipping);
        let net = money::round_cents(total / (Decimal::ONE + tax_rate));
        Totals {
            subtotal,
            tax: total - net,
            total,
            shipping,
        }
    }
}

/// A priced line of an order. Name and unit price are snapshots resolved at
/// creation; the catalog may change afterwards without affecting the order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub variant_code: Option<String>,
    pub name: String,
    pub qty: i32,
    pub unit_price: Decimal,
    pub discount: Decimal,
}

/// A customer's purchase. Owns its lines; never hard-deleted (cancellation
/// is a terminal status, not removal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub currency: String,
    pub totals: Totals,
    pub lines: Vec<OrderLine>,
    pub shipping_address: Option<AddressSnapshot>,
    pub billing_address: Option<AddressSnapshot>,
    pub delivery_requested_at: Option<DateTime<Utc>>,
    pub card_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        currency: String,
        totals: Totals,
        lines: Vec<OrderLine>,
        shipping_address: Option<AddressSnapshot>,
        billing_address: Option<AddressSnapshot>,
        delivery_requested_at: Option<DateTime<Utc>>,
        card_message: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            status: OrderStatus::Draft,
            currency,
            totals,
            lines,
            shipping_address,
            billing_address,
            delivery_requested_at,
            card_message,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(qty: i32, unit_price: Decimal) -> OrderLine {
        OrderLine {
            product_id: Uuid::new_v4(),
            variant_code: None,
            name: "Bouquet".to_string(),
            qty,
            unit_price,
            discount: Decimal::ZERO,
        }
    }

    #[test]
    fn totals_match_the_documented_breakdown() {
        // 2 x 45.00 + 5.00 shipping at 20% VAT
        let totals = Totals::compute(
            &[line(2, Decimal::new(4500, 2))],
            Decimal::new(500, 2),
            Decimal::new(20, 2),
        );

        assert_eq!(totals.subtotal, Decimal::new(9000, 2));
        assert_eq!(totals.total, Decimal::new(9500, 2));
        assert_eq!(totals.tax, Decimal::new(1583, 2)); // 95.00 - 79.17
        assert_eq!(totals.shipping, Decimal::new(500, 2));
    }

    #[test]
    fn totals_with_free_shipping() {
        let totals = Totals::compute(
            &[line(1, Decimal::new(1999, 2)), line(3, Decimal::new(250, 2))],
            Decimal::ZERO,
            Decimal::new(20, 2),
        );

        assert_eq!(totals.subtotal, Decimal::new(2749, 2));
        assert_eq!(totals.total, Decimal::new(2749, 2));
        // net = 27.49 / 1.2 = 22.908... -> 22.91, tax = 4.58
        assert_eq!(totals.tax, Decimal::new(458, 2));
    }

    #[test]
    fn status_round_trips_through_text() {
        use OrderStatus::*;
        for status in [Draft, Paid, Preparing, Shipped, Delivered, Cancelled] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("PAID"), None);
    }
}
