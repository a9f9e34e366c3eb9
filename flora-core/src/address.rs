use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;

/// Frozen copy of a delivery or billing address, embedded into orders so a
/// later address-book edit never rewrites history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSnapshot {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub zip: String,
    pub country: String,
}

/// Address-book collaborator. The book itself is managed elsewhere; the core
/// only ever reads an address scoped to its owner.
#[async_trait]
pub trait AddressProvider: Send + Sync {
    /// Fetch an address only if it belongs to the given user.
    async fn get_owned_address(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<AddressSnapshot>, StoreError>;
}
