use serde::{Deserialize, Serialize};

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database id.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw database id.
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

surrogate_id!(
    /// Identifier of an authenticated user, as issued by the identity collaborator.
    UserId
);

surrogate_id!(
    /// Surrogate key of an order, assigned by the store on insert.
    OrderId
);

surrogate_id!(
    /// Surrogate key of a meal in the catalog.
    MealId
);

surrogate_id!(
    /// Surrogate key of a weekly menu in the catalog.
    MenuId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_preserves_raw_value() {
        let id = OrderId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(OrderId::from(42), id);
    }

    #[test]
    fn id_serializes_as_bare_number() {
        let json = serde_json::to_string(&MealId::new(7)).unwrap();
        assert_eq!(json, "7");

        let parsed: MealId = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, MealId::new(7));
    }

    #[test]
    fn id_display() {
        assert_eq!(UserId::new(3).to_string(), "3");
    }
}
