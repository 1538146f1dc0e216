//! Authenticated identity as handed over by the authentication collaborator.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::UserId;

/// Role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Driver,
    Customer,
}

impl Role {
    /// Returns true if this role may act on resources owned by other users.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Driver => "driver",
            Role::Customer => "customer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role name is not one of `admin`, `driver` or `customer`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "driver" => Ok(Role::Driver),
            "customer" => Ok(Role::Customer),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// A resolved caller: who they are and what they may do.
///
/// The core trusts this value as given; it never re-derives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: i64) -> Self {
        Self::new(UserId::new(user_id), Role::Customer)
    }

    pub fn admin(user_id: i64) -> Self {
        Self::new(UserId::new(user_id), Role::Admin)
    }

    pub fn driver(user_id: i64) -> Self {
        Self::new(UserId::new(user_id), Role::Driver)
    }

    /// Returns true if this identity may act on a resource owned by `owner`.
    pub fn can_act_for(&self, owner: UserId) -> bool {
        self.role.is_privileged() || self.user_id == owner
    }
}
