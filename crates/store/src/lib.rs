//! Relational store access for the order service.
//!
//! This crate provides:
//! - [`TransactionalStore`] and [`StoreHandle`], the narrow interface the core
//!   consumes from a relational engine
//! - [`TransactionManager`], atomic and nestable units of work on top of it
//! - a PostgreSQL backend and an in-memory backend for tests

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod transaction;

pub use error::{Result, StoreError};
pub use memory::{MemoryHandle, MemoryStore};
pub use postgres::{PgConn, PgHandle, PgStore};
pub use store::{StoreHandle, TransactionalStore};
pub use transaction::{CurrentHandle, TransactionManager};

/// Boxed future returned by a unit of work; see [`TransactionManager::run_in_transaction`].
pub use futures_util::future::BoxFuture;
