pub mod app_config;
pub mod memory;
pub mod postgres;

pub use app_config::{BusinessRules, Config, DatabaseConfig, PaymentConfig};
pub use memory::MemoryStore;
pub use postgres::PgStore;
