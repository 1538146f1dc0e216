//! Statements the engine issues, implemented for every store handle.
//!
//! Repositories are traits on the handle itself, so the same call runs on a
//! transaction, inside a savepoint, or on the ambient pool depending on which
//! handle the caller holds.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MealId, MenuId, OrderId, UserId};
use store::{Result, StoreHandle};

use crate::catalog::{Meal, Menu, MenuMeal, NewMeal, NewMenu};
use crate::order::{Money, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};

/// Persistence of orders and their items.
#[async_trait]
pub trait OrderRepository: StoreHandle {
    /// Inserts the order row only and returns its new id.
    async fn insert_order(&mut self, order: &NewOrder, now: DateTime<Utc>) -> Result<OrderId>;

    async fn insert_order_item(
        &mut self,
        order_id: OrderId,
        item: &NewOrderItem,
    ) -> Result<OrderItem>;

    /// Loads an order with its items.
    async fn find_order(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Loads an order and locks it until the enclosing transaction ends.
    async fn find_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders ordered by id, restricted to `owner` when given.
    async fn list_orders(&mut self, owner: Option<UserId>) -> Result<Vec<Order>>;

    /// Sets the status if it is still `from`. Returns false when another
    /// writer changed it first.
    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;
}

/// Persistence of meals and menus.
#[async_trait]
pub trait CatalogRepository: StoreHandle {
    async fn find_meal(&mut self, id: MealId) -> Result<Option<Meal>>;

    /// Loads a menu with its meal links.
    async fn find_menu(&mut self, id: MenuId) -> Result<Option<Menu>>;

    /// Current price of every meal linked to the menu, one entry per link.
    async fn menu_meal_prices(&mut self, id: MenuId) -> Result<Vec<Money>>;

    async fn insert_meal(&mut self, meal: &NewMeal, now: DateTime<Utc>) -> Result<Meal>;

    /// Returns `None` when the meal does not exist.
    async fn update_meal(
        &mut self,
        id: MealId,
        meal: &NewMeal,
        now: DateTime<Utc>,
    ) -> Result<Option<Meal>>;

    /// Returns false when the meal does not exist.
    async fn delete_meal(&mut self, id: MealId) -> Result<bool>;

    /// Menus offering the meal, ordered by id.
    async fn menus_with_meal(&mut self, id: MealId) -> Result<Vec<MenuId>>;

    /// Inserts the menu row only and returns its new id.
    async fn insert_menu(&mut self, menu: &NewMenu, now: DateTime<Utc>) -> Result<MenuId>;

    /// Rewrites the menu row only. Returns false when the menu does not exist.
    async fn update_menu(&mut self, id: MenuId, menu: &NewMenu) -> Result<bool>;

    /// Removes every meal link of the menu, returning how many there were.
    async fn delete_menu_meals(&mut self, id: MenuId) -> Result<u64>;

    async fn insert_menu_meal(&mut self, menu_id: MenuId, link: &MenuMeal) -> Result<()>;
}
