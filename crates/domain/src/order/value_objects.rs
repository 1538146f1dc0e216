//! Value objects for the order domain.

use common::{MealId, MenuId};
use serde::{Deserialize, Serialize};

/// Money amount represented in cents to avoid floating point issues.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Multiplies by a quantity. `None` on overflow.
    pub fn checked_multiply(self, quantity: i32) -> Option<Money> {
        self.cents
            .checked_mul(i64::from(quantity))
            .map(Money::from_cents)
    }

    /// `None` on overflow.
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.cents.checked_add(rhs.cents).map(Money::from_cents)
    }

    /// Adds up amounts, `None` if the sum overflows.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), Money::checked_add)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Kind of catalog entity an order item points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Meal,
    Menu,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Meal => "meal",
            ItemType::Menu => "menu",
        }
    }
}

impl std::str::FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meal" => Ok(ItemType::Meal),
            "menu" => Ok(ItemType::Menu),
            other => Err(format!("unknown item type: {other}")),
        }
    }
}

/// The catalog entity an order item was priced from.
///
/// Serialized as `{"type": "meal", "id": 3}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ItemSource {
    Meal(MealId),
    Menu(MenuId),
}

impl ItemSource {
    pub fn item_type(&self) -> ItemType {
        match self {
            ItemSource::Meal(_) => ItemType::Meal,
            ItemSource::Menu(_) => ItemType::Menu,
        }
    }

    /// Raw id of the referenced entity.
    pub fn item_id(&self) -> i64 {
        match self {
            ItemSource::Meal(id) => id.as_i64(),
            ItemSource::Menu(id) => id.as_i64(),
        }
    }

    pub fn from_parts(item_type: ItemType, item_id: i64) -> Self {
        match item_type {
            ItemType::Meal => ItemSource::Meal(MealId::new(item_id)),
            ItemType::Menu => ItemSource::Menu(MenuId::new(item_id)),
        }
    }

    /// Name of the referenced resource, as used in not-found errors.
    pub fn resource_name(&self) -> &'static str {
        match self {
            ItemSource::Meal(_) => "Meal",
            ItemSource::Menu(_) => "Menu",
        }
    }
}
