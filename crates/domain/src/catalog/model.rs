use chrono::{DateTime, NaiveDate, Utc};
use common::{MealId, MenuId};
use serde::{Deserialize, Serialize};

use crate::{DomainError, Money};

/// A purchasable meal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meal {
    pub id: MealId,
    pub name: String,
    #[serde(rename = "price_cents")]
    pub price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a meal as supplied on create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMeal {
    pub name: String,
    #[serde(rename = "price_cents")]
    pub price: Money,
}

impl NewMeal {
    pub fn new(name: impl Into<String>, price: Money) -> Self {
        Self {
            name: name.into(),
            price,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        let mut violations = Vec::new();
        if self.name.trim().is_empty() {
            violations.push("name is required".to_string());
        }
        if !self.price.is_positive() {
            violations.push("price must be greater than 0".to_string());
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation("invalid meal", violations))
        }
    }
}

/// A meal offered by a menu on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuMeal {
    pub meal_id: MealId,
    pub delivery_day: String,
}

/// A weekly menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub id: MenuId,
    pub name: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub meals: Vec<MenuMeal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMenu {
    pub name: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub meals: Vec<MenuMeal>,
}

impl NewMenu {
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut violations = Vec::new();
        if self.name.trim().is_empty() {
            violations.push("name is required".to_string());
        }
        if self.week_end < self.week_start {
            violations.push("week end must not be before week start".to_string());
        }
        if self.meals.is_empty() {
            violations.push("at least one meal is required".to_string());
        }
        for (index, meal) in self.meals.iter().enumerate() {
            if meal.delivery_day.trim().is_empty() {
                violations.push(format!("meal {index}: delivery day is required"));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(DomainError::validation("invalid menu", violations))
        }
    }
}
