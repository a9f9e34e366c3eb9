pub mod accountant;
pub mod models;
pub mod repository;

pub use accountant::{BookingError, CapacityAccountant, NewSession};
pub use models::{AttendeeRow, Booking, BookingStatus, SeatAvailability, Session};
pub use repository::{Admission, BookingRepository, SessionRepository};
