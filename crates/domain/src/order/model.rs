//! Persisted order shape and the assembled-but-unsaved form it is built from.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::DomainError;

use super::{ItemSource, Money, OrderStatus};

/// One priced line of a stored order.
///
/// `price` and `name` are snapshots taken when the order was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: OrderId,
    pub source: ItemSource,
    pub quantity: i32,
    #[serde(rename = "price_cents")]
    pub price: Money,
    pub name: String,
    pub notes: Option<String>,
}

impl OrderItem {
    /// Returns the total price for this item (quantity * price), `None` on
    /// overflow.
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_multiply(self.quantity)
    }
}

/// A stored order with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    #[serde(rename = "total_cents")]
    pub total: Money,
    pub delivery_address: String,
    pub delivery_date: DateTime<Utc>,
    pub delivery_notes: Option<String>,
    pub payment_method: Option<String>,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Sum of `price * quantity` over the items.
    pub fn items_total(&self) -> Option<Money> {
        self.items
            .iter()
            .try_fold(Money::zero(), |total, item| total.checked_add(item.line_total()?))
    }
}

/// An order item priced from the catalog, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub source: ItemSource,
    pub quantity: i32,
    pub price: Money,
    pub name: String,
    pub notes: Option<String>,
}

impl NewOrderItem {
    pub fn line_total(&self) -> Option<Money> {
        self.price.checked_multiply(self.quantity)
    }

    fn collect_violations(&self, index: usize, violations: &mut Vec<String>) {
        if self.quantity <= 0 {
            violations.push(format!("item {index}: quantity must be greater than 0"));
        }
        if !self.price.is_positive() {
            violations.push(format!("item {index}: price must be greater than 0"));
        }
        if self.name.trim().is_empty() {
            violations.push(format!("item {index}: name is required"));
        }
    }
}

/// A fully assembled order, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub delivery_address: String,
    pub delivery_date: DateTime<Utc>,
    pub delivery_notes: Option<String>,
    pub payment_method: Option<String>,
    pub items: Vec<NewOrderItem>,
}

impl NewOrder {
    /// Assembles a pending order and computes its total from the items.
    ///
    /// A total that does not fit in the money type is a validation error.
    pub fn assemble(
        user_id: UserId,
        delivery_address: String,
        delivery_date: DateTime<Utc>,
        delivery_notes: Option<String>,
        payment_method: Option<String>,
        items: Vec<NewOrderItem>,
    ) -> Result<Self, DomainError> {
        let total = items
            .iter()
            .try_fold(Money::zero(), |total, item| total.checked_add(item.line_total()?))
            .ok_or_else(|| DomainError::invalid("order total is too large"))?;

        Ok(Self {
            user_id,
            status: OrderStatus::Pending,
            total,
            delivery_address,
            delivery_date,
            delivery_notes,
            payment_method,
            items,
        })
    }

    /// The stored form of this order once its row and items are written.
    pub fn into_order(self, id: OrderId, items: Vec<OrderItem>, now: DateTime<Utc>) -> Order {
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
            created_at: now,
            updated_at: now,
        }
    }

    /// Checks the assembled order, reporting every violation found.
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut violations = Vec::new();

        if self.user_id.as_i64() <= 0 {
            violations.push("owning user is required".to_string());
        }
        if self.delivery_address.trim().is_empty() {
            violations.push("delivery address is required".to_string());
        }
        if self.items.is_empty() {
            violations.push("at least one item is required".to_string());
        }
        for (index, item) in self.items.iter().enumerate() {
            item.collect_violations(index, &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation("order validation failed", violations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use chrono::Duration;
    use common::MealId;

    fn item(price: i64, quantity: i32, name: &str) -> NewOrderItem {
        NewOrderItem {
            source: ItemSource::Meal(MealId::new(1)),
            quantity,
            price: Money::from_cents(price),
            name: name.to_string(),
            notes: None,
        }
    }

    fn try_order(items: Vec<NewOrderItem>) -> Result<NewOrder, DomainError> {
        NewOrder::assemble(
            UserId::new(7),
            "1 Main St".to_string(),
            Utc::now() + Duration::days(1),
            None,
            Some("card".to_string()),
            items,
        )
    }

    fn order(items: Vec<NewOrderItem>) -> NewOrder {
        try_order(items).unwrap()
    }

    #[test]
    fn assemble_computes_total_and_starts_pending() {
        let order = order(vec![item(999, 2, "Lasagna"), item(1499, 1, "Curry")]);
        assert_eq!(order.total.cents(), 3497);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.validate().is_ok());
    }

    #[test]
    fn validate_collects_all_violations() {
        let mut order = order(vec![item(0, 0, " "), item(500, 1, "Soup")]);
        order.delivery_address = String::new();
        order.user_id = UserId::new(0);

        match order.validate() {
            Err(DomainError::Validation { violations, .. }) => {
                assert_eq!(
                    violations,
                    vec![
                        "owning user is required",
                        "delivery address is required",
                        "item 0: quantity must be greater than 0",
                        "item 0: price must be greater than 0",
                        "item 0: name is required",
                    ]
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn overflowing_total_is_rejected() {
        let err = try_order(vec![item(i64::MAX / 2, 3, "Caviar")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.details(), Some(serde_json::json!(["order total is too large"])));

        let err = try_order(vec![item(i64::MAX, 1, "Gold"), item(1, 1, "Bread")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn empty_order_is_invalid() {
        let err = order(vec![]).validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
