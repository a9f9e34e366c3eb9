use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Booking lifecycle. Creation is the only user-driven step; everything
/// after is administrator-driven and monotone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Monotone transition table: once out of pending there is no way back.
    pub fn can_transition(self, target: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, target),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }

    /// Statuses that count against session capacity.
    pub fn holds_seats(self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "completed" => Some(BookingStatus::Completed),
            _ => None,
        }
    }
}

/// One timed event instance and its seat budget. `capacity_max` is the only
/// field an administrator edits after creation; raising or lowering it never
/// rewrites existing bookings. The seat price is snapshotted here when the
/// event is published so admission prices bookings without a catalog call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub capacity_max: i32,
    pub seat_price: Decimal,
    pub currency: String,
    pub starts_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A user's claim on some of a session's seats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub qty: i32,
    pub status: BookingStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        qty: i32,
        total_amount: Decimal,
        currency: String,
        notes: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            session_id,
            qty,
            status: BookingStatus::Pending,
            total_amount,
            currency,
            notes,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Display snapshot of a session's seat budget. Not authoritative; admission
/// re-derives the aggregate inside the store.
#[derive(Debug, Clone, Serialize)]
pub struct SeatAvailability {
    pub session_id: Uuid,
    pub capacity_max: i32,
    pub taken: i32,
    pub remaining: i32,
}

/// One row of an attendee roster, aggregated per user or expanded per seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendeeRow {
    pub user_id: Uuid,
    pub qty: i32,
}
