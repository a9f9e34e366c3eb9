mod common;

use common::*;
use flora_catalog::{CatalogItem, ItemVariant};
use flora_core::PageRequest;
use flora_order::{NewOrder, NewOrderLine, OrderError, OrderStatus, Settlement};
use uuid::Uuid;

#[tokio::test]
async fn creation_snapshots_names_prices_and_totals() {
    let app = app();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    let address = seed_address(&app, &user);

    let mut request = order_request(product, 2, 500);
    request.shipping_address_id = Some(address);
    let order = app.orders.create(&user, request).await.unwrap();

    assert_eq!(order.status, OrderStatus::Draft);
    assert_eq!(order.currency, "EUR");
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].name, "Peony bouquet");
    assert_eq!(order.lines[0].unit_price, eur(4500));
    assert_eq!(order.totals.subtotal, eur(9000));
    assert_eq!(order.totals.total, eur(9500));
    assert_eq!(order.totals.tax, eur(1583));
    assert_eq!(order.totals.shipping, eur(500));
    assert_eq!(
        order.shipping_address.as_ref().map(|a| a.city.as_str()),
        Some("Lyon")
    );
}

#[tokio::test]
async fn variant_lines_use_the_variant_price() {
    let app = app();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, Some(6500));

    let order = app
        .orders
        .create(
            &user,
            NewOrder {
                lines: vec![NewOrderLine {
                    product_id: product,
                    variant_code: Some("LARGE".to_string()),
                    qty: 1,
                    discount: None,
                }],
                currency: None,
                shipping_fee: None,
                shipping_address_id: None,
                billing_address_id: None,
                delivery_requested_at: None,
                card_message: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(order.lines[0].unit_price, eur(6500));
}

#[tokio::test]
async fn creation_rejects_bad_input() {
    let app = app();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);

    let empty = NewOrder {
        lines: vec![],
        currency: None,
        shipping_fee: None,
        shipping_address_id: None,
        billing_address_id: None,
        delivery_requested_at: None,
        card_message: None,
    };
    assert!(matches!(
        app.orders.create(&user, empty).await,
        Err(OrderError::EmptyOrder)
    ));

    assert!(matches!(
        app.orders.create(&user, order_request(product, 0, 0)).await,
        Err(OrderError::InvalidQuantity)
    ));

    let missing = Uuid::new_v4();
    assert!(matches!(
        app.orders.create(&user, order_request(missing, 1, 0)).await,
        Err(OrderError::ProductNotFound(id)) if id == missing
    ));

    let mut foreign_address = order_request(product, 1, 0);
    foreign_address.shipping_address_id = Some(seed_address(&app, &client()));
    assert!(matches!(
        app.orders.create(&user, foreign_address).await,
        Err(OrderError::AddressNotFound)
    ));
}

#[tokio::test]
async fn committed_prices_survive_catalog_edits() {
    let app = app();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);

    let order = app
        .orders
        .create(&user, order_request(product, 1, 0))
        .await
        .unwrap();

    // Reprice the catalog item after the fact.
    app.store.put_item(CatalogItem {
        id: product,
        name: "Peony bouquet (new)".to_string(),
        base_price: eur(9900),
        variants: vec![ItemVariant {
            code: "LARGE".to_string(),
            price: eur(12900),
        }],
    });

    let stored = app.orders.get_my_order(&user, order.id).await.unwrap();
    assert_eq!(stored.lines[0].unit_price, eur(4500));
    assert_eq!(stored.lines[0].name, "Peony bouquet");
    assert_eq!(stored.totals.total, order.totals.total);
}

#[tokio::test]
async fn transition_walks_the_edge_table_only() {
    let app = app();
    let admin = admin();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    app.ledger
        .create(&admin, product, "BASE", 10, 0)
        .await
        .unwrap();

    let order = app
        .orders
        .create(&user, order_request(product, 1, 0))
        .await
        .unwrap();

    // Draft cannot skip ahead.
    assert!(matches!(
        app.orders
            .transition(&admin, order.id, OrderStatus::Preparing)
            .await,
        Err(OrderError::InvalidTransition { .. })
    ));

    // Paid is reserved for settlement, even for admins.
    assert!(matches!(
        app.orders.transition(&admin, order.id, OrderStatus::Paid).await,
        Err(OrderError::PaidRequiresSettlement)
    ));

    // Settle, then walk the fulfilment path.
    let settled = app.orders.settle_paid(order.id).await.unwrap();
    assert!(matches!(settled, Settlement::Completed(_)));

    for target in [
        OrderStatus::Preparing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
    ] {
        app.orders.transition(&admin, order.id, target).await.unwrap();
    }

    // Delivered is terminal.
    assert!(matches!(
        app.orders
            .transition(&admin, order.id, OrderStatus::Cancelled)
            .await,
        Err(OrderError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn transitions_require_admin() {
    let app = app();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    let order = app
        .orders
        .create(&user, order_request(product, 1, 0))
        .await
        .unwrap();

    assert!(matches!(
        app.orders
            .transition(&user, order.id, OrderStatus::Cancelled)
            .await,
        Err(OrderError::Forbidden)
    ));
}

#[tokio::test]
async fn settling_twice_is_rejected_by_the_state_machine() {
    let app = app();
    let admin = admin();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    app.ledger
        .create(&admin, product, "BASE", 10, 0)
        .await
        .unwrap();

    let order = app
        .orders
        .create(&user, order_request(product, 2, 0))
        .await
        .unwrap();

    assert!(matches!(
        app.orders.settle_paid(order.id).await.unwrap(),
        Settlement::Completed(_)
    ));
    assert!(matches!(
        app.orders.settle_paid(order.id).await,
        Err(OrderError::InvalidTransition {
            from: OrderStatus::Paid,
            to: OrderStatus::Paid
        })
    ));

    // Exactly one decrement happened.
    let lines = app.ledger.list_for_product(product).await.unwrap();
    assert_eq!(lines[0].qty, 8);
}

#[tokio::test]
async fn orders_are_scoped_to_their_owner() {
    let app = app();
    let user = client();
    let other = client();
    let admin = admin();
    let product = seed_item(&app, "Peony bouquet", 4500, None);

    let order = app
        .orders
        .create(&user, order_request(product, 1, 0))
        .await
        .unwrap();

    assert!(matches!(
        app.orders.get_my_order(&other, order.id).await,
        Err(OrderError::OrderNotFound)
    ));
    assert!(app.orders.get_order(&admin, order.id).await.is_ok());

    let mine = app.orders.my_orders(&user, PageRequest::default()).await.unwrap();
    assert_eq!(mine.total, 1);

    let listed = app
        .orders
        .list_orders(&admin, Some(OrderStatus::Draft), Some(user.user_id), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(listed.items.len(), 1);

    assert!(matches!(
        app.orders
            .list_orders(&user, None, None, PageRequest::default())
            .await,
        Err(OrderError::Forbidden)
    ));
}
