use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MealId, MenuId, OrderId, UserId};
use sqlx::{Row, postgres::PgRow};
use store::{PgHandle, Result};

use super::{CatalogRepository, OrderRepository};
use crate::catalog::{Meal, Menu, MenuMeal, NewMeal, NewMenu};
use crate::order::{ItemSource, ItemType, Money, NewOrder, NewOrderItem, Order, OrderItem, OrderStatus};

const ORDER_COLUMNS: &str = "id, user_id, status, total_cents, delivery_address, delivery_date, \
     delivery_notes, payment_method, created_at, updated_at";

fn decode_error(err: impl Into<sqlx::error::BoxDynError>) -> sqlx::Error {
    sqlx::Error::Decode(err.into())
}

fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: OrderId::new(row.try_get("id")?),
        user_id: UserId::new(row.try_get("user_id")?),
        status: status.parse::<OrderStatus>().map_err(decode_error)?,
        total: Money::from_cents(row.try_get("total_cents")?),
        delivery_address: row.try_get("delivery_address")?,
        delivery_date: row.try_get("delivery_date")?,
        delivery_notes: row.try_get("delivery_notes")?,
        payment_method: row.try_get("payment_method")?,
        items,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    let item_type: String = row.try_get("item_type")?;
    let item_type = item_type.parse::<ItemType>().map_err(decode_error)?;
    Ok(OrderItem {
        id: row.try_get("id")?,
        order_id: OrderId::new(row.try_get("order_id")?),
        source: ItemSource::from_parts(item_type, row.try_get("item_id")?),
        quantity: row.try_get("quantity")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        name: row.try_get("name")?,
        notes: row.try_get("notes")?,
    })
}

fn row_to_meal(row: &PgRow) -> Result<Meal> {
    Ok(Meal {
        id: MealId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn load_items(handle: &mut PgHandle, order_ids: &[i64]) -> Result<Vec<OrderItem>> {
    let mut conn = handle.conn().await?;
    let rows = sqlx::query(
        r#"
        SELECT id, order_id, item_type, item_id, quantity, price_cents, name, notes
        FROM order_items
        WHERE order_id = ANY($1)
        ORDER BY id ASC
        "#,
    )
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(row_to_item).collect()
}

async fn load_order(handle: &mut PgHandle, id: OrderId, lock: bool) -> Result<Option<Order>> {
    let sql = if lock {
        format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1")
    };

    let row = {
        let mut conn = handle.conn().await?;
        sqlx::query(&sql)
            .bind(id.as_i64())
            .fetch_optional(&mut *conn)
            .await?
    };

    match row {
        Some(row) => {
            let items = load_items(handle, &[id.as_i64()]).await?;
            Ok(Some(row_to_order(&row, items)?))
        }
        None => Ok(None),
    }
}

#[async_trait]
impl OrderRepository for PgHandle {
    async fn insert_order(&mut self, order: &NewOrder, now: DateTime<Utc>) -> Result<OrderId> {
        let mut conn = self.conn().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO orders (user_id, status, total_cents, delivery_address, delivery_date,
                                delivery_notes, payment_method, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            RETURNING id
            "#,
        )
        .bind(order.user_id.as_i64())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(&order.delivery_address)
        .bind(order.delivery_date)
        .bind(&order.delivery_notes)
        .bind(&order.payment_method)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(OrderId::new(id))
    }

    async fn insert_order_item(
        &mut self,
        order_id: OrderId,
        item: &NewOrderItem,
    ) -> Result<OrderItem> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO order_items (order_id, item_type, item_id, quantity, price_cents, name, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, order_id, item_type, item_id, quantity, price_cents, name, notes
            "#,
        )
        .bind(order_id.as_i64())
        .bind(item.source.item_type().as_str())
        .bind(item.source.item_id())
        .bind(item.quantity)
        .bind(item.price.cents())
        .bind(&item.name)
        .bind(&item.notes)
        .fetch_one(&mut *conn)
        .await?;

        row_to_item(&row)
    }

    async fn find_order(&mut self, id: OrderId) -> Result<Option<Order>> {
        load_order(self, id, false).await
    }

    async fn find_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>> {
        load_order(self, id, true).await
    }

    async fn list_orders(&mut self, owner: Option<UserId>) -> Result<Vec<Order>> {
        let rows = {
            let mut conn = self.conn().await?;
            sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders \
                 WHERE ($1::BIGINT IS NULL OR user_id = $1) ORDER BY id ASC"
            ))
            .bind(owner.map(|owner| owner.as_i64()))
            .fetch_all(&mut *conn)
            .await?
        };

        let ids: Vec<i64> = rows
            .iter()
            .map(|row| row.try_get("id"))
            .collect::<std::result::Result<_, _>>()?;

        let mut items_by_order: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for item in load_items(self, &ids).await? {
            items_by_order
                .entry(item.order_id.as_i64())
                .or_default()
                .push(item);
        }

        rows.iter()
            .map(|row| -> Result<Order> {
                let id: i64 = row.try_get("id")?;
                row_to_order(row, items_by_order.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn update_order_status(
        &mut self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut conn = self.conn().await?;
        let result = sqlx::query(
            "UPDATE orders SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(to.as_str())
        .bind(now)
        .bind(id.as_i64())
        .bind(from.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CatalogRepository for PgHandle {
    async fn find_meal(&mut self, id: MealId) -> Result<Option<Meal>> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            "SELECT id, name, price_cents, created_at, updated_at FROM meals WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(row_to_meal).transpose()
    }

    async fn find_menu(&mut self, id: MenuId) -> Result<Option<Menu>> {
        let mut conn = self.conn().await?;
        let Some(row) = sqlx::query(
            "SELECT id, name, week_start, week_end, created_at FROM menus WHERE id = $1",
        )
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };

        let links = sqlx::query(
            "SELECT meal_id, delivery_day FROM menu_meals WHERE menu_id = $1 ORDER BY id ASC",
        )
        .bind(id.as_i64())
        .fetch_all(&mut *conn)
        .await?;

        let meals = links
            .iter()
            .map(|link| -> Result<MenuMeal> {
                Ok(MenuMeal {
                    meal_id: MealId::new(link.try_get("meal_id")?),
                    delivery_day: link.try_get("delivery_day")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(Menu {
            id,
            name: row.try_get("name")?,
            week_start: row.try_get("week_start")?,
            week_end: row.try_get("week_end")?,
            meals,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn menu_meal_prices(&mut self, id: MenuId) -> Result<Vec<Money>> {
        let mut conn = self.conn().await?;
        let prices: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT m.price_cents
            FROM menu_meals mm
            JOIN meals m ON m.id = mm.meal_id
            WHERE mm.menu_id = $1
            ORDER BY mm.id ASC
            "#,
        )
        .bind(id.as_i64())
        .fetch_all(&mut *conn)
        .await?;

        Ok(prices.into_iter().map(Money::from_cents).collect())
    }

    async fn insert_meal(&mut self, meal: &NewMeal, now: DateTime<Utc>) -> Result<Meal> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO meals (name, price_cents, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING id, name, price_cents, created_at, updated_at
            "#,
        )
        .bind(&meal.name)
        .bind(meal.price.cents())
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        row_to_meal(&row)
    }

    async fn update_meal(
        &mut self,
        id: MealId,
        meal: &NewMeal,
        now: DateTime<Utc>,
    ) -> Result<Option<Meal>> {
        let mut conn = self.conn().await?;
        let row = sqlx::query(
            r#"
            UPDATE meals SET name = $1, price_cents = $2, updated_at = $3
            WHERE id = $4
            RETURNING id, name, price_cents, created_at, updated_at
            "#,
        )
        .bind(&meal.name)
        .bind(meal.price.cents())
        .bind(now)
        .bind(id.as_i64())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(row_to_meal).transpose()
    }

    async fn delete_meal(&mut self, id: MealId) -> Result<bool> {
        let mut conn = self.conn().await?;
        let result = sqlx::query("DELETE FROM meals WHERE id = $1")
            .bind(id.as_i64())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn menus_with_meal(&mut self, id: MealId) -> Result<Vec<MenuId>> {
        let mut conn = self.conn().await?;
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT DISTINCT menu_id FROM menu_meals WHERE meal_id = $1 ORDER BY menu_id ASC",
        )
        .bind(id.as_i64())
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids.into_iter().map(MenuId::new).collect())
    }

    async fn insert_menu(&mut self, menu: &NewMenu, now: DateTime<Utc>) -> Result<MenuId> {
        let mut conn = self.conn().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO menus (name, week_start, week_end, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&menu.name)
        .bind(menu.week_start)
        .bind(menu.week_end)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Ok(MenuId::new(id))
    }

    async fn update_menu(&mut self, id: MenuId, menu: &NewMenu) -> Result<bool> {
        let mut conn = self.conn().await?;
        let result =
            sqlx::query("UPDATE menus SET name = $2, week_start = $3, week_end = $4 WHERE id = $1")
                .bind(id.as_i64())
                .bind(&menu.name)
                .bind(menu.week_start)
                .bind(menu.week_end)
                .execute(&mut *conn)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_menu_meals(&mut self, id: MenuId) -> Result<u64> {
        let mut conn = self.conn().await?;
        let result = sqlx::query("DELETE FROM menu_meals WHERE menu_id = $1")
            .bind(id.as_i64())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_menu_meal(&mut self, menu_id: MenuId, link: &MenuMeal) -> Result<()> {
        let mut conn = self.conn().await?;
        sqlx::query("INSERT INTO menu_meals (menu_id, meal_id, delivery_day) VALUES ($1, $2, $3)")
            .bind(menu_id.as_i64())
            .bind(link.meal_id.as_i64())
            .bind(&link.delivery_day)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
