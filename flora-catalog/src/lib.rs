pub mod catalog;
pub mod stock;

pub use catalog::{CatalogItem, CatalogProvider, ItemVariant};
pub use stock::{
    ConditionalUpdate, LedgerError, LineDelete, LineDemand, LineWrite, Shortfall, StockCommit,
    StockLedger, StockLine, StockPatch, StockRepository, BASE_VARIANT,
};
