use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flora_core::{AuthUser, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Variant code used when an order line carries none.
pub const BASE_VARIANT: &str = "BASE";

/// Normalize an optional variant code: trimmed, defaulting to [`BASE_VARIANT`].
pub fn variant_or_base(code: Option<&str>) -> String {
    match code.map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => BASE_VARIANT.to_string(),
    }
}

/// Stock counter for one (product, variant) pair. `qty` never goes negative;
/// uniqueness on the pair is guarded by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_code: String,
    pub qty: i32,
    pub reorder_level: i32,
    pub updated_at: DateTime<Utc>,
}

impl StockLine {
    pub fn new(product_id: Uuid, variant_code: String, qty: i32, reorder_level: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            variant_code,
            qty,
            reorder_level,
            updated_at: Utc::now(),
        }
    }

    /// Replenishment flag surfaced to administrators.
    pub fn is_below_reorder(&self) -> bool {
        self.qty <= self.reorder_level
    }
}

/// Admin patch for a stock line. Quantity changes go through `adjust`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StockPatch {
    pub variant_code: Option<String>,
    pub reorder_level: Option<i32>,
}

/// Demand one order line places on the ledger.
#[derive(Debug, Clone)]
pub struct LineDemand {
    pub product_id: Uuid,
    pub variant_code: String,
    pub qty: i32,
}

/// A demand the ledger could not cover.
#[derive(Debug, Clone, Serialize)]
pub struct Shortfall {
    pub product_id: Uuid,
    pub variant_code: String,
    pub requested: i32,
    pub available: i32,
}

/// Outcome of a conditional single-line write. The condition is evaluated by
/// the store in the same indivisible step as the write.
#[derive(Debug)]
pub enum ConditionalUpdate {
    Updated(StockLine),
    Insufficient { available: i32 },
    NotFound,
}

/// Outcome of an all-or-nothing multi-line decrement. `Short` means nothing
/// was written.
#[derive(Debug)]
pub enum StockCommit {
    Committed,
    Short(Vec<Shortfall>),
}

/// Outcome of an insert or patch guarded by (product, variant) uniqueness.
#[derive(Debug)]
pub enum LineWrite {
    Written(StockLine),
    Duplicate,
    NotFound,
}

/// Outcome of a guarded delete.
#[derive(Debug)]
pub enum LineDelete {
    Deleted,
    InUse,
    NotFound,
}

/// Storage contract for the ledger. Every conditional mutation pairs its
/// precondition with the write inside the store; callers never read-then-write.
#[async_trait]
pub trait StockRepository: Send + Sync {
    async fn insert_line(&self, line: StockLine) -> Result<LineWrite, StoreError>;

    async fn update_line(&self, line_id: Uuid, patch: StockPatch) -> Result<LineWrite, StoreError>;

    /// Refuses while any order outside a terminal status still references
    /// the line's (product, variant).
    async fn delete_line(&self, line_id: Uuid) -> Result<LineDelete, StoreError>;

    async fn get_line(&self, line_id: Uuid) -> Result<Option<StockLine>, StoreError>;

    async fn lines_for_product(&self, product_id: Uuid) -> Result<Vec<StockLine>, StoreError>;

    /// Decrement keyed by (product, variant), only if `qty` remains covered.
    async fn decrement(
        &self,
        product_id: Uuid,
        variant_code: &str,
        qty: i32,
    ) -> Result<ConditionalUpdate, StoreError>;

    /// Adjust by line id. Under `forbid_negative` the write only happens if
    /// the stored quantity covers a negative delta.
    async fn adjust(
        &self,
        line_id: Uuid,
        delta: i32,
        forbid_negative: bool,
    ) -> Result<ConditionalUpdate, StoreError>;

    /// Decrement every demand or none of them, in one atomic unit.
    async fn decrement_all(&self, demands: &[LineDemand]) -> Result<StockCommit, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Stock line not found")]
    LineNotFound,

    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i32, available: i32 },

    #[error("A stock line already exists for this product and variant")]
    DuplicateLine,

    #[error("Stock line is still referenced by open orders")]
    LineInUse,

    #[error("Quantity out of range")]
    InvalidQuantity,

    #[error("Admin role required")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The inventory ledger. Wraps the store's conditional writes with variant
/// defaulting, admin gating and input validation.
pub struct StockLedger {
    repo: Arc<dyn StockRepository>,
}

impl StockLedger {
    pub fn new(repo: Arc<dyn StockRepository>) -> Self {
        Self { repo }
    }

    /// Admin: create a stock line for a (product, variant) pair.
    pub async fn create(
        &self,
        auth: &AuthUser,
        product_id: Uuid,
        variant_code: &str,
        qty: i32,
        reorder_level: i32,
    ) -> Result<StockLine, LedgerError> {
        require_admin(auth)?;
        if qty < 0 || reorder_level < 0 {
            return Err(LedgerError::InvalidQuantity);
        }

        let code = variant_or_base(Some(variant_code));
        let line = StockLine::new(product_id, code, qty, reorder_level);
        match self.repo.insert_line(line).await? {
            LineWrite::Written(line) => {
                tracing::info!(%product_id, variant = %line.variant_code, qty, "stock line created");
                Ok(line)
            }
            LineWrite::Duplicate => Err(LedgerError::DuplicateLine),
            LineWrite::NotFound => Err(LedgerError::LineNotFound),
        }
    }

    /// Admin: patch variant code or reorder level.
    pub async fn update(
        &self,
        auth: &AuthUser,
        line_id: Uuid,
        patch: StockPatch,
    ) -> Result<StockLine, LedgerError> {
        require_admin(auth)?;
        if patch.reorder_level.is_some_and(|level| level < 0) {
            return Err(LedgerError::InvalidQuantity);
        }

        match self.repo.update_line(line_id, patch).await? {
            LineWrite::Written(line) => Ok(line),
            LineWrite::Duplicate => Err(LedgerError::DuplicateLine),
            LineWrite::NotFound => Err(LedgerError::LineNotFound),
        }
    }

    /// Admin: remove a line no open order references.
    pub async fn remove(&self, auth: &AuthUser, line_id: Uuid) -> Result<(), LedgerError> {
        require_admin(auth)?;
        match self.repo.delete_line(line_id).await? {
            LineDelete::Deleted => Ok(()),
            LineDelete::InUse => Err(LedgerError::LineInUse),
            LineDelete::NotFound => Err(LedgerError::LineNotFound),
        }
    }

    /// Admin: receive or remove stock. A negative delta under
    /// `forbid_negative` only succeeds if enough quantity remains.
    pub async fn adjust(
        &self,
        auth: &AuthUser,
        line_id: Uuid,
        delta: i32,
        forbid_negative: bool,
    ) -> Result<StockLine, LedgerError> {
        require_admin(auth)?;
        match self.repo.adjust(line_id, delta, forbid_negative).await? {
            ConditionalUpdate::Updated(line) => {
                if line.is_below_reorder() {
                    tracing::warn!(line_id = %line.id, qty = line.qty, "stock at or below reorder level");
                }
                Ok(line)
            }
            ConditionalUpdate::Insufficient { available } => Err(LedgerError::InsufficientStock {
                requested: delta.unsigned_abs() as i32,
                available,
            }),
            ConditionalUpdate::NotFound => Err(LedgerError::LineNotFound),
        }
    }

    /// Take `qty` from a (product, variant) pair. Missing variant codes fall
    /// back to [`BASE_VARIANT`].
    pub async fn decrement(
        &self,
        product_id: Uuid,
        variant_code: Option<&str>,
        qty: i32,
    ) -> Result<StockLine, LedgerError> {
        if qty < 1 {
            return Err(LedgerError::InvalidQuantity);
        }

        let code = variant_or_base(variant_code);
        match self.repo.decrement(product_id, &code, qty).await? {
            ConditionalUpdate::Updated(line) => {
                if line.is_below_reorder() {
                    tracing::warn!(line_id = %line.id, qty = line.qty, "stock at or below reorder level");
                }
                Ok(line)
            }
            ConditionalUpdate::Insufficient { available } => {
                tracing::warn!(%product_id, variant = %code, requested = qty, available, "decrement denied");
                Err(LedgerError::InsufficientStock {
                    requested: qty,
                    available,
                })
            }
            ConditionalUpdate::NotFound => Err(LedgerError::LineNotFound),
        }
    }

    /// Commit a whole order's demands in one atomic unit, or report every
    /// shortfall without touching anything. Demands for the same pair are
    /// merged first.
    pub async fn commit_demands(&self, demands: &[LineDemand]) -> Result<StockCommit, StoreError> {
        let merged = merge_demands(demands);
        self.repo.decrement_all(&merged).await
    }

    pub async fn get(&self, line_id: Uuid) -> Result<Option<StockLine>, LedgerError> {
        Ok(self.repo.get_line(line_id).await?)
    }

    pub async fn list_for_product(&self, product_id: Uuid) -> Result<Vec<StockLine>, LedgerError> {
        Ok(self.repo.lines_for_product(product_id).await?)
    }
}

fn require_admin(auth: &AuthUser) -> Result<(), LedgerError> {
    if auth.is_admin() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden)
    }
}

fn merge_demands(demands: &[LineDemand]) -> Vec<LineDemand> {
    let mut merged: Vec<LineDemand> = Vec::with_capacity(demands.len());
    for demand in demands {
        match merged
            .iter_mut()
            .find(|d| d.product_id == demand.product_id && d.variant_code == demand.variant_code)
        {
            Some(existing) => existing.qty += demand.qty,
            None => merged.push(demand.clone()),
        }
    }
    merged
}
