mod common;

use common::*;
use flora_catalog::{LedgerError, StockPatch};
use flora_order::OrderStatus;
use uuid::Uuid;

#[tokio::test]
async fn decrement_stops_exactly_at_zero() {
    let app = app();
    let admin = admin();
    let product = seed_item(&app, "Peony bouquet", 4500, None);

    app.ledger
        .create(&admin, product, "BASE", 5, 0)
        .await
        .unwrap();

    let line = app.ledger.decrement(product, Some("BASE"), 5).await.unwrap();
    assert_eq!(line.qty, 0);

    let denied = app.ledger.decrement(product, Some("BASE"), 1).await;
    assert!(matches!(
        denied,
        Err(LedgerError::InsufficientStock {
            requested: 1,
            available: 0
        })
    ));
}

#[tokio::test]
async fn decrement_distinguishes_missing_lines_from_empty_ones() {
    let app = app();
    let denied = app.ledger.decrement(Uuid::new_v4(), None, 1).await;
    assert!(matches!(denied, Err(LedgerError::LineNotFound)));
}

#[tokio::test]
async fn missing_variant_code_uses_base() {
    let app = app();
    let admin = admin();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    app.ledger
        .create(&admin, product, "", 3, 0)
        .await
        .unwrap();

    let line = app.ledger.decrement(product, None, 1).await.unwrap();
    assert_eq!(line.variant_code, "BASE");
    assert_eq!(line.qty, 2);
}

#[tokio::test]
async fn adjust_guards_negative_quantities() {
    let app = app();
    let admin = admin();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    let line = app
        .ledger
        .create(&admin, product, "BASE", 10, 2)
        .await
        .unwrap();

    let line_after = app.ledger.adjust(&admin, line.id, -4, true).await.unwrap();
    assert_eq!(line_after.qty, 6);

    let denied = app.ledger.adjust(&admin, line.id, -7, true).await;
    assert!(matches!(
        denied,
        Err(LedgerError::InsufficientStock { available: 6, .. })
    ));

    // Explicit override used for corrections: negative balances allowed.
    let corrected = app.ledger.adjust(&admin, line.id, -7, false).await.unwrap();
    assert_eq!(corrected.qty, -1);
}

#[tokio::test]
async fn duplicate_lines_are_rejected() {
    let app = app();
    let admin = admin();
    let product = seed_item(&app, "Peony bouquet", 4500, None);

    app.ledger
        .create(&admin, product, "LARGE", 5, 0)
        .await
        .unwrap();
    let denied = app.ledger.create(&admin, product, "LARGE", 9, 0).await;
    assert!(matches!(denied, Err(LedgerError::DuplicateLine)));

    // Renaming onto an occupied variant is the same conflict.
    let other = app
        .ledger
        .create(&admin, product, "BASE", 5, 0)
        .await
        .unwrap();
    let denied = app
        .ledger
        .update(
            &admin,
            other.id,
            StockPatch {
                variant_code: Some("LARGE".to_string()),
                reorder_level: None,
            },
        )
        .await;
    assert!(matches!(denied, Err(LedgerError::DuplicateLine)));
}

#[tokio::test]
async fn ledger_edits_require_admin() {
    let app = app();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);

    let denied = app.ledger.create(&user, product, "BASE", 5, 0).await;
    assert!(matches!(denied, Err(LedgerError::Forbidden)));
}

#[tokio::test]
async fn lines_referenced_by_open_orders_cannot_be_removed() {
    let app = app();
    let admin = admin();
    let user = client();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    let line = app
        .ledger
        .create(&admin, product, "BASE", 10, 0)
        .await
        .unwrap();

    let order = app
        .orders
        .create(&user, order_request(product, 1, 0))
        .await
        .unwrap();

    let denied = app.ledger.remove(&admin, line.id).await;
    assert!(matches!(denied, Err(LedgerError::LineInUse)));

    app.orders
        .transition(&admin, order.id, OrderStatus::Cancelled)
        .await
        .unwrap();
    app.ledger.remove(&admin, line.id).await.unwrap();
    assert!(app.ledger.get(line.id).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_decrements_never_oversell() {
    let app = app();
    let admin = admin();
    let product = seed_item(&app, "Peony bouquet", 4500, None);
    app.ledger
        .create(&admin, product, "BASE", 50, 0)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..100 {
        let ledger = app.ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger.decrement(product, Some("BASE"), 1).await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(LedgerError::InsufficientStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(succeeded, 50);
    let lines = app.ledger.list_for_product(product).await.unwrap();
    assert_eq!(lines[0].qty, 0);
}
