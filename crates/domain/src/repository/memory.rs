use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use common::{MealId, MenuId, OrderId, UserId};
use serde::{Deserialize, Serialize};
use store::{MemoryHandle, Result};

use super::{CatalogRepository, OrderRepository};
use crate::catalog::{Meal, Menu, MenuMeal, NewMeal, NewMenu};
use crate::order::{ItemSource, Money, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};

const ORDERS: &str = "orders";
const ORDER_ITEMS: &str = "order_items";
const MEALS: &str = "meals";
const MENUS: &str = "menus";
const MENU_MEALS: &str = "menu_meals";

#[derive(Serialize, Deserialize)]
struct OrderRow {
    user_id: UserId,
    status: OrderStatus,
    total: Money,
    delivery_address: String,
    delivery_date: DateTime<Utc>,
    delivery_notes: Option<String>,
    payment_method: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_order(self, id: OrderId, items: Vec<OrderItem>) -> Order {
        Order {
            id,
            user_id: self.user_id,
            status: self.status,
            total: self.total,
            delivery_address: self.delivery_address,
            delivery_date: self.delivery_date,
            delivery_notes: self.delivery_notes,
            payment_method: self.payment_method,
            items,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct OrderItemRow {
    order_id: OrderId,
    source: ItemSource,
    quantity: i32,
    price: Money,
    name: String,
    notes: Option<String>,
}

impl OrderItemRow {
    fn into_item(self, id: i64) -> OrderItem {
        OrderItem {
            id,
            order_id: self.order_id,
            source: self.source,
            quantity: self.quantity,
            price: self.price,
            name: self.name,
            notes: self.notes,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MealRow {
    name: String,
    price: Money,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MealRow {
    fn into_meal(self, id: MealId) -> Meal {
        Meal {
            id,
            name: self.name,
            price: self.price,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MenuRow {
    name: String,
    week_start: NaiveDate,
    week_end: NaiveDate,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct MenuMealRow {
    menu_id: MenuId,
    meal_id: MealId,
    delivery_day: String,
}

async fn items_of(handle: &mut MemoryHandle, order_id: OrderId) -> Result<Vec<OrderItem>> {
    let rows: Vec<(i64, OrderItemRow)> =
        handle.select_by(ORDER_ITEMS, "order_id", &order_id).await?;
    Ok(rows.into_iter().map(|(id, row)| row.into_item(id)).collect())
}

async fn links_of(
    handle: &mut MemoryHandle,
    menu_id: MenuId,
) -> Result<Vec<(i64, MenuMealRow)>> {
    handle.select_by(MENU_MEALS, "menu_id", &menu_id).await
}

#[async_trait]
impl OrderRepository for MemoryHandle {
    async fn insert_order(&mut self, order: &NewOrder, now: DateTime<Utc>) -> Result<OrderId> {
        let row = OrderRow {
            user_id: order.user_id,
            status: order.status,
            total: order.total,
            delivery_address: order.delivery_address.clone(),
            delivery_date: order.delivery_date,
            delivery_notes: order.delivery_notes.clone(),
            payment_method: order.payment_method.clone(),
            created_at: now,
            updated_at: now,
        };
        Ok(OrderId::new(self.insert(ORDERS, &row).await?))
    }

    async fn insert_order_item(
        &mut self,
        order_id: OrderId,
        item: &NewOrderItem,
    ) -> Result<OrderItem> {
        let row = OrderItemRow {
            order_id,
            source: item.source,
            quantity: item.quantity,
            price: item.price,
            name: item.name.clone(),
            notes: item.notes.clone(),
        };
        let id = self.insert(ORDER_ITEMS, &row).await?;
        Ok(row.into_item(id))
    }

    async fn find_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        let Some(row) = self.get::<OrderRow>(ORDERS, id.as_i64()).await? else {
            return Ok(None);
        };
        let items = items_of(self, id).await?;
        Ok(Some(row.into_order(id, items)))
    }

    // No lock to take: a concurrent writer of this row makes the later commit
    // fail with a conflict instead.
    async fn find_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        self.find_order(id).await
    }

    async fn list_orders(&mut self, owner: Option<UserId>) -> Result<Vec<Order>> {
        let rows: Vec<(i64, OrderRow)> = self.select(ORDERS).await?;
        let mut orders = Vec::new();
        for (id, row) in rows {
            if owner.is_some_and(|owner| owner != row.user_id) {
                continue;
            }
            let id = OrderId::new(id);
            let items = items_of(self, id).await?;
            orders.push(row.into_order(id, items));
        }
        Ok(orders)
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(mut row) = self.get::<OrderRow>(ORDERS, id.as_i64()).await? else {
            return Ok(false);
        };
        if row.status != from {
            return Ok(false);
        }
        row.status = to;
        row.updated_at = now;
        self.update(ORDERS, id.as_i64(), &row).await
    }
}

#[async_trait]
impl CatalogRepository for MemoryHandle {
    async fn find_meal(&mut self, id: MealId) -> Result<Option<Meal>> {
        let row = self.get::<MealRow>(MEALS, id.as_i64()).await?;
        Ok(row.map(|row| row.into_meal(id)))
    }

    async fn find_menu(&mut self, id: MenuId) -> Result<Option<Menu>> {
        let Some(row) = self.get::<MenuRow>(MENUS, id.as_i64()).await? else {
            return Ok(None);
        };
        let meals = links_of(self, id)
            .await?
            .into_iter()
            .map(|(_, link)| MenuMeal {
                meal_id: link.meal_id,
                delivery_day: link.delivery_day,
            })
            .collect();

        Ok(Some(Menu {
            id,
            name: row.name,
            week_start: row.week_start,
            week_end: row.week_end,
            meals,
            created_at: row.created_at,
        }))
    }

    async fn menu_meal_prices(&mut self, id: MenuId) -> Result<Vec<Money>> {
        let mut prices = Vec::new();
        for (_, link) in links_of(self, id).await? {
            if let Some(meal) = self.get::<MealRow>(MEALS, link.meal_id.as_i64()).await? {
                prices.push(meal.price);
            }
        }
        Ok(prices)
    }

    async fn insert_meal(&mut self, meal: &NewMeal, now: DateTime<Utc>) -> Result<Meal> {
        let row = MealRow {
            name: meal.name.clone(),
            price: meal.price,
            created_at: now,
            updated_at: now,
        };
        let id = self.insert(MEALS, &row).await?;
        Ok(row.into_meal(MealId::new(id)))
    }

    async fn update_meal(
        &mut self,
        id: MealId,
        meal: &NewMeal,
        now: DateTime<Utc>,
    ) -> Result<Option<Meal>> {
        let Some(mut row) = self.get::<MealRow>(MEALS, id.as_i64()).await? else {
            return Ok(None);
        };
        row.name = meal.name.clone();
        row.price = meal.price;
        row.updated_at = now;
        self.update(MEALS, id.as_i64(), &row).await?;
        Ok(Some(row.into_meal(id)))
    }

    async fn delete_meal(&mut self, id: MealId) -> Result<bool> {
        self.delete(MEALS, id.as_i64()).await
    }

    async fn menus_with_meal(&mut self, id: MealId) -> Result<Vec<MenuId>> {
        let rows: Vec<(i64, MenuMealRow)> = self.select_by(MENU_MEALS, "meal_id", &id).await?;
        let mut menus: Vec<MenuId> = rows
            .into_iter()
            .map(|(_, row)| row.menu_id)
            .collect();
        menus.sort();
        menus.dedup();
        Ok(menus)
    }

    async fn insert_menu(&mut self, menu: &NewMenu, now: DateTime<Utc>) -> Result<MenuId> {
        let row = MenuRow {
            name: menu.name.clone(),
            week_start: menu.week_start,
            week_end: menu.week_end,
            created_at: now,
        };
        Ok(MenuId::new(self.insert(MENUS, &row).await?))
    }

    async fn update_menu(&mut self, id: MenuId, menu: &NewMenu) -> Result<bool> {
        let Some(mut row) = self.get::<MenuRow>(MENUS, id.as_i64()).await? else {
            return Ok(false);
        };
        row.name = menu.name.clone();
        row.week_start = menu.week_start;
        row.week_end = menu.week_end;
        self.update(MENUS, id.as_i64(), &row).await
    }

    async fn delete_menu_meals(&mut self, id: MenuId) -> Result<u64> {
        let mut removed = 0;
        for (link_id, _) in links_of(self, id).await? {
            if self.delete(MENU_MEALS, link_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn insert_menu_meal(&mut self, menu_id: MenuId, link: &MenuMeal) -> Result<()> {
        let row = MenuMealRow {
            menu_id,
            meal_id: link.meal_id,
            delivery_day: link.delivery_day.clone(),
        };
        self.insert(MENU_MEALS, &row).await?;
        Ok(())
    }
}
