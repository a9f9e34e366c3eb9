mod common;

use common::*;
use flora_booking::{BookingError, BookingStatus};
use flora_core::PageRequest;

#[tokio::test]
async fn admission_fills_the_pool_exactly() {
    let app = app();
    let admin = admin();
    let alice = client();
    let bob = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(10, 3500))
        .await
        .unwrap();

    // Nine seats already confirmed.
    let existing = app
        .accountant
        .admit(&alice, session.id, 9, None)
        .await
        .unwrap();
    app.accountant
        .update_status(&admin, existing.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    let denied = app.accountant.admit(&bob, session.id, 2, None).await;
    assert!(matches!(
        denied,
        Err(BookingError::InsufficientSeats {
            requested: 2,
            remaining: 1
        })
    ));

    app.accountant.admit(&bob, session.id, 1, None).await.unwrap();

    let availability = app.accountant.remaining(session.id).await.unwrap();
    assert_eq!(availability.taken, 10);
    assert_eq!(availability.remaining, 0);
}

#[tokio::test]
async fn cancelled_bookings_release_their_seats() {
    let app = app();
    let admin = admin();
    let user = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(5, 3500))
        .await
        .unwrap();

    let booking = app
        .accountant
        .admit(&user, session.id, 5, None)
        .await
        .unwrap();
    assert_eq!(booking.total_amount, eur(17500));

    assert!(app.accountant.admit(&user, session.id, 1, None).await.is_err());

    app.accountant
        .update_status(&admin, booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();

    let availability = app.accountant.remaining(session.id).await.unwrap();
    assert_eq!(availability.remaining, 5);
    app.accountant.admit(&user, session.id, 3, None).await.unwrap();
}

#[tokio::test]
async fn booking_lifecycle_is_monotone() {
    let app = app();
    let admin = admin();
    let user = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(5, 3500))
        .await
        .unwrap();
    let booking = app
        .accountant
        .admit(&user, session.id, 1, None)
        .await
        .unwrap();

    let confirmed = app
        .accountant
        .update_status(&admin, booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);

    let back = app
        .accountant
        .update_status(&admin, booking.id, BookingStatus::Pending)
        .await;
    assert!(matches!(back, Err(BookingError::InvalidTransition { .. })));

    let completed = app
        .accountant
        .update_status(&admin, booking.id, BookingStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    let reopened = app
        .accountant
        .update_status(&admin, booking.id, BookingStatus::Cancelled)
        .await;
    assert!(matches!(reopened, Err(BookingError::InvalidTransition { .. })));
}

#[tokio::test]
async fn status_updates_require_admin() {
    let app = app();
    let admin = admin();
    let user = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(5, 3500))
        .await
        .unwrap();
    let booking = app
        .accountant
        .admit(&user, session.id, 1, None)
        .await
        .unwrap();

    let denied = app
        .accountant
        .update_status(&user, booking.id, BookingStatus::Confirmed)
        .await;
    assert!(matches!(denied, Err(BookingError::Forbidden)));
}

#[tokio::test]
async fn roster_aggregates_and_expands() {
    let app = app();
    let admin = admin();
    let alice = client();
    let bob = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(10, 3500))
        .await
        .unwrap();

    let a1 = app.accountant.admit(&alice, session.id, 2, None).await.unwrap();
    let a2 = app.accountant.admit(&alice, session.id, 1, None).await.unwrap();
    app.accountant.admit(&bob, session.id, 3, None).await.unwrap();
    for id in [a1.id, a2.id] {
        app.accountant
            .update_status(&admin, id, BookingStatus::Confirmed)
            .await
            .unwrap();
    }

    // Confirmed only: just Alice's 3 seats.
    let confirmed = app
        .accountant
        .attendees(&admin, session.id, false, false)
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].qty, 3);

    // Including pending picks up Bob.
    let everyone = app
        .accountant
        .attendees(&admin, session.id, true, false)
        .await
        .unwrap();
    assert_eq!(everyone.iter().map(|r| r.qty).sum::<i32>(), 6);

    // Per-seat expansion for badge sheets.
    let seats = app
        .accountant
        .attendees(&admin, session.id, true, true)
        .await
        .unwrap();
    assert_eq!(seats.len(), 6);
    assert!(seats.iter().all(|r| r.qty == 1));

    let denied = app.accountant.attendees(&bob, session.id, false, false).await;
    assert!(matches!(denied, Err(BookingError::Forbidden)));
}

#[tokio::test]
async fn bookings_are_scoped_to_their_owner() {
    let app = app();
    let admin = admin();
    let user = client();
    let other = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(5, 3500))
        .await
        .unwrap();
    let booking = app
        .accountant
        .admit(&user, session.id, 2, None)
        .await
        .unwrap();

    assert!(matches!(
        app.accountant.get_my_booking(&other, booking.id).await,
        Err(BookingError::BookingNotFound)
    ));
    assert_eq!(
        app.accountant
            .get_my_booking(&user, booking.id)
            .await
            .unwrap()
            .id,
        booking.id
    );

    let listed = app
        .accountant
        .list_bookings(&admin, Some(BookingStatus::Pending), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(listed.total, 1);

    assert!(matches!(
        app.accountant
            .list_bookings(&user, None, PageRequest::default())
            .await,
        Err(BookingError::Forbidden)
    ));
}

#[tokio::test]
async fn capacity_edits_never_rewrite_existing_bookings() {
    let app = app();
    let admin = admin();
    let user = client();

    let session = app
        .accountant
        .create_session(&admin, session_request(10, 3500))
        .await
        .unwrap();
    app.accountant.admit(&user, session.id, 8, None).await.unwrap();

    // Shrinking below the seats already taken keeps them booked.
    app.accountant.set_capacity(&admin, session.id, 5).await.unwrap();

    let availability = app.accountant.remaining(session.id).await.unwrap();
    assert_eq!(availability.taken, 8);
    assert_eq!(availability.remaining, 0);

    assert!(app.accountant.admit(&user, session.id, 1, None).await.is_err());

    let my = app
        .accountant
        .my_bookings(&user, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(my.items.len(), 1);
    assert_eq!(my.items[0].qty, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_oversell() {
    let app = app();
    let admin = admin();

    let session = app
        .accountant
        .create_session(&admin, session_request(10, 3500))
        .await
        .unwrap();

    let accountant = std::sync::Arc::new(app.accountant);
    let mut handles = Vec::new();
    for _ in 0..30 {
        let accountant = accountant.clone();
        let user = client();
        handles.push(tokio::spawn(async move {
            accountant.admit(&user, session.id, 1, None).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(BookingError::InsufficientSeats { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(admitted, 10);
    let availability = accountant.remaining(session.id).await.unwrap();
    assert_eq!(availability.taken, 10);
    assert_eq!(availability.remaining, 0);
}
