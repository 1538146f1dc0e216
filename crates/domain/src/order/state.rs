//! Order status machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// Pending ──► Paid ──► Preparing ──► Delivering ──► Delivered
///    │         │
///    └─────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Placed and awaiting payment. Every order starts here.
    #[default]
    Pending,

    /// Payment received; the kitchen has not started.
    Paid,

    /// Being cooked. No longer cancellable.
    Preparing,

    /// Out with a driver.
    Delivering,

    /// Handed to the customer. Terminal.
    Delivered,

    /// Withdrawn before preparation began. Terminal.
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Preparing,
        OrderStatus::Delivering,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Statuses directly reachable from this one.
    pub fn successors(&self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[OrderStatus::Paid, OrderStatus::Cancelled],
            OrderStatus::Paid => &[OrderStatus::Preparing, OrderStatus::Cancelled],
            OrderStatus::Preparing => &[OrderStatus::Delivering],
            OrderStatus::Delivering => &[OrderStatus::Delivered],
            OrderStatus::Delivered | OrderStatus::Cancelled => &[],
        }
    }

    /// Returns true if the graph has an edge from this status to `target`.
    pub fn can_transition_to(&self, target: OrderStatus) -> bool {
        self.successors().contains(&target)
    }

    /// Returns true if the order can be cancelled in this status.
    ///
    /// Checked independently of [`can_transition_to`](Self::can_transition_to).
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Delivering => "delivering",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown order status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for OrderStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_pending() {
        assert_eq!(OrderStatus::default(), OrderStatus::Pending);
    }

    #[test]
    fn graph_has_exactly_the_listed_edges() {
        use OrderStatus::*;
        let edges = [
            (Pending, Paid),
            (Pending, Cancelled),
            (Paid, Preparing),
            (Paid, Cancelled),
            (Preparing, Delivering),
            (Delivering, Delivered),
        ];

        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    edges.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn only_pending_and_paid_can_cancel() {
        assert!(OrderStatus::Pending.can_cancel());
        assert!(OrderStatus::Paid.can_cancel());
        assert!(!OrderStatus::Preparing.can_cancel());
        assert!(!OrderStatus::Delivering.can_cancel());
        assert!(!OrderStatus::Delivered.can_cancel());
        assert!(!OrderStatus::Cancelled.can_cancel());
    }

    #[test]
    fn terminal_statuses_have_no_successors() {
        for status in OrderStatus::ALL {
            assert_eq!(status.is_terminal(), status.successors().is_empty());
        }
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn parses_and_displays_lowercase() {
        assert_eq!("Paid".parse::<OrderStatus>(), Ok(OrderStatus::Paid));
        assert_eq!(" delivering ".parse::<OrderStatus>(), Ok(OrderStatus::Delivering));
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert_eq!(OrderStatus::Preparing.to_string(), "preparing");
        assert_eq!(serde_json::to_string(&OrderStatus::Cancelled).unwrap(), "\"cancelled\"");
    }
}
