use async_trait::async_trait;
use flora_core::{Page, PageRequest, StoreError};
use uuid::Uuid;

use crate::models::{Booking, BookingStatus, SeatAvailability, Session};

/// Outcome of a serialized admission attempt.
#[derive(Debug)]
pub enum Admission {
    Created(Booking),
    SessionNotFound,
    InsufficientSeats { remaining: i32 },
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert_session(&self, session: Session) -> Result<Session, StoreError>;

    async fn set_capacity(
        &self,
        session_id: Uuid,
        capacity_max: i32,
    ) -> Result<Option<Session>, StoreError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<Session>, StoreError>;

    async fn list_sessions(&self, page: PageRequest) -> Result<Page<Session>, StoreError>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Aggregate seats taken and insert the booking in one step serialized
    /// per session, so concurrent admissions never jointly oversell.
    async fn admit(&self, booking: Booking) -> Result<Admission, StoreError>;

    /// Non-authoritative availability snapshot for display.
    async fn seats_taken(&self, session_id: Uuid) -> Result<Option<SeatAvailability>, StoreError>;

    async fn get_booking(&self, booking_id: Uuid) -> Result<Option<Booking>, StoreError>;

    async fn bookings_for_user(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Page<Booking>, StoreError>;

    async fn list_bookings(
        &self,
        status: Option<BookingStatus>,
        page: PageRequest,
    ) -> Result<Page<Booking>, StoreError>;

    async fn bookings_for_session(&self, session_id: Uuid) -> Result<Vec<Booking>, StoreError>;

    async fn set_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<Option<Booking>, StoreError>;
}
