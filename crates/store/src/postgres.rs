use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, PgConnection, PgPool, Postgres, Transaction};

use crate::{
    Result, StoreError,
    store::{StoreHandle, TransactionalStore, validate_savepoint_name},
};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new PostgreSQL store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl TransactionalStore for PgStore {
    type Handle = PgHandle;

    async fn begin(&self) -> Result<PgHandle> {
        let tx = self.pool.begin().await.map_err(StoreError::Begin)?;
        Ok(PgHandle::Tx(tx))
    }

    fn ambient(&self) -> PgHandle {
        PgHandle::Pool(self.pool.clone())
    }
}

/// Handle on a PostgreSQL store: the pool itself, or an open transaction.
pub enum PgHandle {
    Pool(PgPool),
    Tx(Transaction<'static, Postgres>),
}

impl PgHandle {
    /// Borrows a connection to run typed queries on.
    ///
    /// Inside a transaction this is the transaction's connection. On an ambient
    /// handle a connection is checked out of the pool for the borrow's duration.
    pub async fn conn(&mut self) -> Result<PgConn<'_>> {
        match self {
            PgHandle::Pool(pool) => Ok(PgConn::Pooled(pool.acquire().await?)),
            PgHandle::Tx(tx) => Ok(PgConn::Tx(&mut **tx)),
        }
    }

    /// Executes an arbitrary statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(run_statement(&mut conn, sql).await?)
    }

    async fn savepoint_statement(
        &mut self,
        name: &str,
        sql: String,
        wrap: fn(String, sqlx::Error) -> StoreError,
    ) -> Result<()> {
        validate_savepoint_name(name)?;
        let PgHandle::Tx(tx) = self else {
            return Err(StoreError::NoActiveTransaction);
        };
        let conn: &mut PgConnection = tx;
        run_statement(conn, &sql)
            .await
            .map_err(|source| wrap(name.to_string(), source))?;
        Ok(())
    }
}

/// Runs one unprepared statement on a concrete connection.
///
/// `Executor::execute` hands back a boxed `Send` future, so callers inside
/// `#[async_trait]` bodies never see the executor's higher-ranked lifetimes.
async fn run_statement(conn: &mut PgConnection, sql: &str) -> sqlx::Result<u64> {
    let result = conn.execute(sql).await?;
    Ok(result.rows_affected())
}

#[async_trait]
impl StoreHandle for PgHandle {
    fn in_transaction(&self) -> bool {
        matches!(self, PgHandle::Tx(_))
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoint_statement(name, format!("SAVEPOINT {name}"), |name, source| {
            StoreError::Savepoint { name, source }
        })
        .await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoint_statement(
            name,
            format!("ROLLBACK TO SAVEPOINT {name}"),
            |name, source| StoreError::RollbackToSavepoint { name, source },
        )
        .await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.savepoint_statement(
            name,
            format!("RELEASE SAVEPOINT {name}"),
            |name, source| StoreError::ReleaseSavepoint { name, source },
        )
        .await
    }

    async fn commit(self) -> Result<()> {
        match self {
            PgHandle::Tx(tx) => tx.commit().await.map_err(StoreError::Commit),
            PgHandle::Pool(_) => Ok(()),
        }
    }

    async fn rollback(self) -> Result<()> {
        match self {
            PgHandle::Tx(tx) => tx.rollback().await.map_err(StoreError::Rollback),
            PgHandle::Pool(_) => Ok(()),
        }
    }
}

/// A connection borrowed from a [`PgHandle`].
pub enum PgConn<'a> {
    Pooled(PoolConnection<Postgres>),
    Tx(&'a mut PgConnection),
}

impl Deref for PgConn<'_> {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            PgConn::Pooled(conn) => &**conn,
            PgConn::Tx(conn) => &**conn,
        }
    }
}

impl DerefMut for PgConn<'_> {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            PgConn::Pooled(conn) => &mut **conn,
            PgConn::Tx(conn) => &mut **conn,
        }
    }
}
