//! Business core of the order service.
//!
//! This crate provides:
//! - The order lifecycle engine ([`OrderService`]) with its status graph
//! - Admin-only catalog operations ([`CatalogService`])
//! - The error taxonomy and responder ([`DomainError`], [`ErrorResponse`])
//! - Repository traits implemented for every store handle
//!
//! Every mutation runs inside a [`store::TransactionManager`] unit of work and
//! accepts the caller's scope, so operations compose without opening a second
//! top-level transaction.

pub mod catalog;
pub mod error;
pub mod identity;
pub mod order;
pub mod repository;

pub use catalog::{CatalogService, Meal, Menu, MenuMeal, NewMeal, NewMenu};
pub use error::{DomainError, ErrorBody, ErrorKind, ErrorResponse, FORBIDDEN_MESSAGE};
pub use identity::{IdentityResolver, require_identity};
pub use order::{
    CreateOrder, ItemSource, ItemType, Money, NewOrder, NewOrderItem, Order, OrderItem,
    OrderService, OrderStatus, RequestedItem, UpdateStatus,
};
pub use repository::{CatalogRepository, OrderRepository};
