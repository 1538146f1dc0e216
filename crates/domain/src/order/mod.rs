//! Orders: status machine, pricing and the lifecycle engine.

mod commands;
mod model;
mod service;
mod state;
mod value_objects;

pub use commands::{CreateOrder, RequestedItem, UpdateStatus};
pub use model::{NewOrder, NewOrderItem, Order, OrderItem};
pub use service::OrderService;
pub use state::{OrderStatus, ParseStatusError};
pub use value_objects::{ItemSource, ItemType, Money};
