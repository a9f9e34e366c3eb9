pub mod address;
pub mod identity;
pub mod money;
pub mod page;
pub mod payment;

pub use identity::{AuthUser, Role};
pub use page::{Page, PageRequest};

/// Failure of the backing store itself. Capacity, stock and lifecycle
/// conflicts are typed outcomes in the domain crates; this error is reserved
/// for conditions the caller cannot recover from by adjusting input.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored data could not be decoded: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
