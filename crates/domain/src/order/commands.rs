//! Order commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DomainError;

use super::ItemSource;

/// One line of an order request: what to buy and how many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedItem {
    pub source: ItemSource,
    pub quantity: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RequestedItem {
    pub fn new(source: ItemSource, quantity: i32) -> Self {
        Self {
            source,
            quantity,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Command to place a new order.
///
/// Prices are never taken from the request; they are resolved from the
/// catalog when the order is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    #[serde(default)]
    pub delivery_address: String,
    #[serde(default)]
    pub delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_notes: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub items: Vec<RequestedItem>,
}

impl CreateOrder {
    /// Creates a new CreateOrder command with no items.
    pub fn new(delivery_address: impl Into<String>, delivery_date: DateTime<Utc>) -> Self {
        Self {
            delivery_address: delivery_address.into(),
            delivery_date: Some(delivery_date),
            delivery_notes: None,
            payment_method: None,
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, item: RequestedItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = Some(method.into());
        self
    }

    pub fn with_delivery_notes(mut self, notes: impl Into<String>) -> Self {
        self.delivery_notes = Some(notes.into());
        self
    }

    /// Rejects incomplete requests before anything is resolved, listing every
    /// problem at once. Returns the delivery date on success.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        let mut violations = Vec::new();

        if self.delivery_address.trim().is_empty() {
            violations.push("delivery address is required".to_string());
        }
        match self.delivery_date {
            None => violations.push("delivery date is required".to_string()),
            Some(date) if date <= now => {
                violations.push("delivery date must be in the future".to_string())
            }
            Some(_) => {}
        }
        if self.items.is_empty() {
            violations.push("at least one item is required".to_string());
        }
        for (index, item) in self.items.iter().enumerate() {
            if item.quantity < 1 {
                violations.push(format!("item {index}: quantity must be at least 1"));
            }
        }

        match self.delivery_date {
            Some(date) if violations.is_empty() => Ok(date),
            _ => Err(DomainError::validation("invalid order request", violations)),
        }
    }
}

/// Request body for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub status: super::OrderStatus,
}
