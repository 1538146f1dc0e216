//! Meals and weekly menus: the entities orders are priced from.

mod model;
mod service;

pub use model::{Meal, Menu, MenuMeal, NewMeal, NewMenu};
pub use service::CatalogService;
