use std::sync::Arc;

use chrono::{DateTime, Utc};
use flora_core::{money, AuthUser, Page, PageRequest, StoreError};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{AttendeeRow, Booking, BookingStatus, SeatAvailability, Session};
use crate::repository::{Admission, BookingRepository, SessionRepository};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Insufficient seats: requested {requested}, remaining {remaining}")]
    InsufficientSeats { requested: i32, remaining: i32 },

    #[error("Booking not found")]
    BookingNotFound,

    #[error("Quantity must be at least 1")]
    InvalidQuantity,

    #[error("Capacity must be at least 1")]
    InvalidCapacity,

    #[error("Invalid booking transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Admin role required")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fields for publishing a session's seat budget. Title and pricing come
/// from the event being published; everything descriptive stays with the
/// catalog collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub title: String,
    pub capacity_max: i32,
    pub seat_price: Decimal,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
}

/// Owns per-session seat accounting. Admission is linearizable per session:
/// the aggregate check and the booking insert happen inside the store, never
/// here.
pub struct CapacityAccountant {
    sessions: Arc<dyn SessionRepository>,
    bookings: Arc<dyn BookingRepository>,
}

impl CapacityAccountant {
    pub fn new(sessions: Arc<dyn SessionRepository>, bookings: Arc<dyn BookingRepository>) -> Self {
        Self { sessions, bookings }
    }

    /// Claim `qty` seats on a session for the caller. The new booking is
    /// priced `qty x seat_price` and starts pending.
    pub async fn admit(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        qty: i32,
        notes: Option<String>,
    ) -> Result<Booking, BookingError> {
        if qty < 1 {
            return Err(BookingError::InvalidQuantity);
        }

        let session = self
            .sessions
            .get_session(session_id)
            .await?
            .ok_or(BookingError::SessionNotFound)?;

        let total = money::round_cents(session.seat_price * Decimal::from(qty));
        let booking = Booking::new(
            auth.user_id,
            session_id,
            qty,
            total,
            session.currency.clone(),
            notes,
        );

        match self.bookings.admit(booking).await? {
            Admission::Created(booking) => {
                tracing::info!(booking_id = %booking.id, %session_id, qty, "booking admitted");
                Ok(booking)
            }
            Admission::SessionNotFound => Err(BookingError::SessionNotFound),
            Admission::InsufficientSeats { remaining } => {
                tracing::warn!(%session_id, requested = qty, remaining, "admission denied");
                Err(BookingError::InsufficientSeats {
                    requested: qty,
                    remaining,
                })
            }
        }
    }

    /// Availability snapshot for display. Reads without the admission
    /// serialization, so it may lag a concurrent admit.
    pub async fn remaining(&self, session_id: Uuid) -> Result<SeatAvailability, BookingError> {
        self.bookings
            .seats_taken(session_id)
            .await?
            .ok_or(BookingError::SessionNotFound)
    }

    /// Admin roster for an event: per-user seat totals, confirmed only by
    /// default, optionally expanded to one row per seat for badge sheets.
    pub async fn attendees(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        include_pending: bool,
        per_seat: bool,
    ) -> Result<Vec<AttendeeRow>, BookingError> {
        require_admin(auth)?;
        if self.sessions.get_session(session_id).await?.is_none() {
            return Err(BookingError::SessionNotFound);
        }

        let bookings = self.bookings.bookings_for_session(session_id).await?;
        Ok(roster(&bookings, include_pending, per_seat))
    }

    pub async fn my_bookings(
        &self,
        auth: &AuthUser,
        page: PageRequest,
    ) -> Result<Page<Booking>, BookingError> {
        Ok(self.bookings.bookings_for_user(auth.user_id, page).await?)
    }

    pub async fn get_my_booking(
        &self,
        auth: &AuthUser,
        booking_id: Uuid,
    ) -> Result<Booking, BookingError> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .filter(|b| b.user_id == auth.user_id)
            .ok_or(BookingError::BookingNotFound)
    }

    pub async fn list_bookings(
        &self,
        auth: &AuthUser,
        status: Option<BookingStatus>,
        page: PageRequest,
    ) -> Result<Page<Booking>, BookingError> {
        require_admin(auth)?;
        Ok(self.bookings.list_bookings(status, page).await?)
    }

    /// Admin: move a booking along its monotone lifecycle.
    pub async fn update_status(
        &self,
        auth: &AuthUser,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<Booking, BookingError> {
        require_admin(auth)?;

        let booking = self
            .bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;

        if !booking.status.can_transition(status) {
            return Err(BookingError::InvalidTransition {
                from: booking.status,
                to: status,
            });
        }

        self.bookings
            .set_status(booking_id, status)
            .await?
            .ok_or(BookingError::BookingNotFound)
    }

    /// Admin: publish a session's seat budget.
    pub async fn create_session(
        &self,
        auth: &AuthUser,
        new: NewSession,
    ) -> Result<Session, BookingError> {
        require_admin(auth)?;
        if new.capacity_max < 1 {
            return Err(BookingError::InvalidCapacity);
        }

        let session = Session {
            id: Uuid::new_v4(),
            title: new.title,
            capacity_max: new.capacity_max,
            seat_price: new.seat_price,
            currency: new.currency,
            starts_at: new.starts_at,
            created_at: Utc::now(),
        };
        Ok(self.sessions.insert_session(session).await?)
    }

    /// Admin: resize the seat budget. Existing bookings are untouched even
    /// when the new budget is already exceeded.
    pub async fn set_capacity(
        &self,
        auth: &AuthUser,
        session_id: Uuid,
        capacity_max: i32,
    ) -> Result<Session, BookingError> {
        require_admin(auth)?;
        if capacity_max < 1 {
            return Err(BookingError::InvalidCapacity);
        }

        self.sessions
            .set_capacity(session_id, capacity_max)
            .await?
            .ok_or(BookingError::SessionNotFound)
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Session, BookingError> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or(BookingError::SessionNotFound)
    }

    pub async fn list_sessions(&self, page: PageRequest) -> Result<Page<Session>, BookingError> {
        Ok(self.sessions.list_sessions(page).await?)
    }
}

fn require_admin(auth: &AuthUser) -> Result<(), BookingError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(BookingError::Forbidden)
    }
}

/// Aggregate bookings into roster rows, one per user, ordered by user id for
/// stable output. `per_seat` expands each row into unit rows.
fn roster(bookings: &[Booking], include_pending: bool, per_seat: bool) -> Vec<AttendeeRow> {
    let mut per_user: std::collections::BTreeMap<Uuid, i32> = std::collections::BTreeMap::new();
    for booking in bookings {
        let counted = booking.status == BookingStatus::Confirmed
            || (include_pending && booking.status == BookingStatus::Pending);
        if counted {
            *per_user.entry(booking.user_id).or_insert(0) += booking.qty;
        }
    }

    let rows: Vec<AttendeeRow> = per_user
        .into_iter()
        .map(|(user_id, qty)| AttendeeRow { user_id, qty })
        .collect();

    if !per_seat {
        return rows;
    }

    rows.into_iter()
        .flat_map(|row| {
            std::iter::repeat(AttendeeRow {
                user_id: row.user_id,
                qty: 1,
            })
            .take(row.qty.max(0) as usize)
        })
        .collect()
}
