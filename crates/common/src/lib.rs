//! Shared types for the order service.

mod identity;
mod types;

pub use identity::{Identity, ParseRoleError, Role};
pub use types::{MealId, MenuId, OrderId, UserId};
