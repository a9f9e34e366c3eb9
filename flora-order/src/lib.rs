pub mod lifecycle;
pub mod models;
pub mod service;

pub use lifecycle::{allowed_targets, can_transition};
pub use models::{Order, OrderLine, OrderStatus, Totals};
pub use service::{
    NewOrder, NewOrderLine, OrderError, OrderPolicy, OrderRepository, OrderService, Settlement,
};
