#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use flora_booking::{CapacityAccountant, NewSession};
use flora_catalog::{CatalogItem, ItemVariant, StockLedger};
use flora_core::address::AddressSnapshot;
use flora_core::payment::MockProvider;
use flora_core::AuthUser;
use flora_order::{NewOrder, NewOrderLine, OrderPolicy, OrderService};
use flora_payment::{webhook, PaymentReconciler, WebhookVerifier};
use flora_store::MemoryStore;
use rust_decimal::Decimal;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test";

/// The full consistency core wired over one in-memory store, the way a
/// deployment wires it over Postgres.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<StockLedger>,
    pub accountant: CapacityAccountant,
    pub orders: Arc<OrderService>,
    pub reconciler: PaymentReconciler,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .try_init();
}

pub fn app() -> TestApp {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(StockLedger::new(store.clone()));

    let orders = Arc::new(OrderService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        ledger.clone(),
        OrderPolicy {
            tax_rate: Decimal::new(20, 2),
            default_currency: "EUR".to_string(),
            default_shipping_fee: Decimal::ZERO,
        },
    ));

    let accountant = CapacityAccountant::new(store.clone(), store.clone());

    let reconciler = PaymentReconciler::new(
        store.clone(),
        orders.clone(),
        store.clone(),
        Arc::new(MockProvider),
        WebhookVerifier::new(WEBHOOK_SECRET, 300),
    );

    TestApp {
        store,
        ledger,
        accountant,
        orders,
        reconciler,
    }
}

pub fn admin() -> AuthUser {
    AuthUser::admin(Uuid::new_v4())
}

pub fn client() -> AuthUser {
    AuthUser::client(Uuid::new_v4())
}

pub fn eur(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Seed a catalog item with an optional LARGE variant and return its id.
pub fn seed_item(app: &TestApp, name: &str, base_cents: i64, large_cents: Option<i64>) -> Uuid {
    let id = Uuid::new_v4();
    app.store.put_item(CatalogItem {
        id,
        name: name.to_string(),
        base_price: eur(base_cents),
        variants: large_cents
            .map(|cents| {
                vec![ItemVariant {
                    code: "LARGE".to_string(),
                    price: eur(cents),
                }]
            })
            .unwrap_or_default(),
    });
    id
}

pub fn seed_address(app: &TestApp, user: &AuthUser) -> Uuid {
    let address_id = Uuid::new_v4();
    app.store.put_address(
        user.user_id,
        address_id,
        AddressSnapshot {
            line1: "12 rue des Lilas".to_string(),
            line2: None,
            city: "Lyon".to_string(),
            zip: "69003".to_string(),
            country: "FR".to_string(),
        },
    );
    address_id
}

pub fn order_request(product_id: Uuid, qty: i32, shipping_cents: i64) -> NewOrder {
    NewOrder {
        lines: vec![NewOrderLine {
            product_id,
            variant_code: None,
            qty,
            discount: None,
        }],
        currency: None,
        shipping_fee: Some(eur(shipping_cents)),
        shipping_address_id: None,
        billing_address_id: None,
        delivery_requested_at: None,
        card_message: None,
    }
}

pub fn session_request(capacity: i32, price_cents: i64) -> NewSession {
    NewSession {
        title: "Hand-tied bouquet workshop".to_string(),
        capacity_max: capacity,
        seat_price: eur(price_cents),
        currency: "EUR".to_string(),
        starts_at: Utc::now(),
    }
}

pub fn success_payload(tx_ref: &str, order_id: Option<Uuid>, amount_minor: i64) -> Vec<u8> {
    let body = match order_id {
        Some(order_id) => format!(
            r#"{{"id":"evt_{tx_ref}","type":"payment_intent.succeeded","data":{{"object":{{"id":"{tx_ref}","amount":{amount_minor},"currency":"eur","metadata":{{"order_id":"{order_id}"}}}}}}}}"#
        ),
        None => format!(
            r#"{{"id":"evt_{tx_ref}","type":"payment_intent.succeeded","data":{{"object":{{"id":"{tx_ref}","amount":{amount_minor},"currency":"eur"}}}}}}"#
        ),
    };
    body.into_bytes()
}

pub fn failure_payload(tx_ref: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"evt_{tx_ref}_fail","type":"payment_intent.payment_failed","data":{{"object":{{"id":"{tx_ref}"}}}}}}"#
    )
    .into_bytes()
}

pub fn other_payload(kind: &str) -> Vec<u8> {
    format!(r#"{{"id":"evt_other","type":"{kind}","data":{{"object":{{"id":"pi_unrelated"}}}}}}"#)
        .into_bytes()
}

pub fn sign(payload: &[u8]) -> String {
    webhook::sign_payload(WEBHOOK_SECRET, Utc::now().timestamp(), payload)
}
