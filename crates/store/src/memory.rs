use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use crate::{
    Result, StoreError,
    store::{StoreHandle, TransactionalStore, validate_savepoint_name},
};

type RowKey = (String, i64);

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, BTreeMap<i64, serde_json::Value>>,
}

impl Tables {
    fn table(&self, table: &str) -> Option<&BTreeMap<i64, serde_json::Value>> {
        self.rows.get(table)
    }

    fn get(&self, table: &str, id: i64) -> Option<&serde_json::Value> {
        self.rows.get(table).and_then(|rows| rows.get(&id))
    }

    /// Writes or removes one row, returning whether it existed before.
    fn put(&mut self, table: &str, id: i64, value: Option<serde_json::Value>) -> bool {
        let rows = self.rows.entry(table.to_string()).or_default();
        match value {
            Some(value) => rows.insert(id, value).is_some(),
            None => rows.remove(&id).is_some(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    sequences: HashMap<String, i64>,
    fail_next_commit: bool,
    fail_next_rollback: bool,
}

/// In-memory store implementation for testing.
///
/// Tables hold JSON rows keyed by auto-incremented ids. Transactions work on a
/// private snapshot of all tables and apply exactly the rows they wrote on
/// commit. Concurrency control is optimistic: a writing transaction whose
/// reads or writes were changed by another commit after it began fails to
/// commit with [`StoreError::Conflict`] and leaves no trace. Id sequences are
/// shared and non-transactional, as in PostgreSQL.
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<RwLock<Shared>>,
}

impl MemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of committed rows in a table.
    pub async fn row_count(&self, table: &str) -> usize {
        self.shared
            .read()
            .await
            .tables
            .table(table)
            .map_or(0, BTreeMap::len)
    }

    /// Makes the next commit fail after discarding the transaction's writes.
    pub async fn fail_next_commit(&self) {
        self.shared.write().await.fail_next_commit = true;
    }

    /// Makes the next top-level rollback report a failure.
    ///
    /// The writes are still discarded; only the reported outcome changes.
    pub async fn fail_next_rollback(&self) {
        self.shared.write().await.fail_next_rollback = true;
    }
}

#[async_trait]
impl TransactionalStore for MemoryStore {
    type Handle = MemoryHandle;

    async fn begin(&self) -> Result<MemoryHandle> {
        let base = self.shared.read().await.tables.clone();
        Ok(MemoryHandle {
            shared: self.shared.clone(),
            tx: Some(TxState {
                working: base.clone(),
                base,
                dirty: BTreeSet::new(),
                read: BTreeSet::new(),
                scans: Vec::new(),
                savepoints: Vec::new(),
            }),
        })
    }

    fn ambient(&self) -> MemoryHandle {
        MemoryHandle {
            shared: self.shared.clone(),
            tx: None,
        }
    }
}

/// A table scan, optionally restricted to rows whose `column` equals a value.
#[derive(Debug, Clone, PartialEq)]
struct Scan {
    table: String,
    filter: Option<(String, serde_json::Value)>,
}

impl Scan {
    fn rows(&self, tables: &Tables) -> Vec<(i64, serde_json::Value)> {
        let Some(rows) = tables.table(&self.table) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|(_, row)| match &self.filter {
                Some((column, value)) => row.get(column) == Some(value),
                None => true,
            })
            .map(|(id, row)| (*id, row.clone()))
            .collect()
    }
}

#[derive(Debug)]
struct TxState {
    /// Committed tables as of `begin`.
    base: Tables,
    working: Tables,
    dirty: BTreeSet<RowKey>,
    read: BTreeSet<RowKey>,
    scans: Vec<Scan>,
    savepoints: Vec<SavepointState>,
}

#[derive(Debug)]
struct SavepointState {
    name: String,
    working: Tables,
    dirty: BTreeSet<RowKey>,
}

impl TxState {
    fn position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|sp| sp.name == name)
            .ok_or_else(|| StoreError::UnknownSavepoint(name.to_string()))
    }

    /// Describes the first row or scan this transaction depends on that a
    /// commit made after `begin` has changed.
    fn first_conflict(&self, committed: &Tables) -> Option<String> {
        let stale_row = self
            .dirty
            .iter()
            .chain(&self.read)
            .find(|(table, id)| committed.get(table, *id) != self.base.get(table, *id));
        if let Some((table, id)) = stale_row {
            return Some(format!("{table} row {id}"));
        }

        self.scans
            .iter()
            .find(|scan| scan.rows(committed) != scan.rows(&self.base))
            .map(|scan| match &scan.filter {
                Some((column, value)) => format!("{} rows where {column} = {value}", scan.table),
                None => format!("table {}", scan.table),
            })
    }
}

/// Handle on a [`MemoryStore`].
///
/// Ambient handles read and write the committed tables directly. Transaction
/// handles see their own uncommitted writes and nothing written by others
/// after they began.
pub struct MemoryHandle {
    shared: Arc<RwLock<Shared>>,
    tx: Option<TxState>,
}

impl MemoryHandle {
    /// Inserts a row and returns its newly assigned id.
    pub async fn insert<T: Serialize + Sync>(&mut self, table: &str, row: &T) -> Result<i64> {
        let value = serde_json::to_value(row)?;
        let id = self.next_id(table).await;
        self.write_row(table, id, Some(value)).await;
        Ok(id)
    }

    /// Loads one row by id.
    pub async fn get<T: DeserializeOwned>(&mut self, table: &str, id: i64) -> Result<Option<T>> {
        let value = match &mut self.tx {
            Some(tx) => {
                tx.read.insert((table.to_string(), id));
                tx.working.get(table, id).cloned()
            }
            None => self.shared.read().await.tables.get(table, id).cloned(),
        };
        Ok(value.map(serde_json::from_value).transpose()?)
    }

    /// Loads every row of a table, ordered by id.
    pub async fn select<T: DeserializeOwned>(&mut self, table: &str) -> Result<Vec<(i64, T)>> {
        let scan = Scan {
            table: table.to_string(),
            filter: None,
        };
        self.scan(scan).await
    }

    /// Loads the rows of a table whose `column` equals `value`, ordered by id.
    pub async fn select_by<T, V>(
        &mut self,
        table: &str,
        column: &str,
        value: &V,
    ) -> Result<Vec<(i64, T)>>
    where
        T: DeserializeOwned,
        V: Serialize + Sync + ?Sized,
    {
        let scan = Scan {
            table: table.to_string(),
            filter: Some((column.to_string(), serde_json::to_value(value)?)),
        };
        self.scan(scan).await
    }

    /// Replaces an existing row. Returns false if there was no such row.
    pub async fn update<T: Serialize + Sync>(
        &mut self,
        table: &str,
        id: i64,
        row: &T,
    ) -> Result<bool> {
        if self.get::<serde_json::Value>(table, id).await?.is_none() {
            return Ok(false);
        }
        let value = serde_json::to_value(row)?;
        self.write_row(table, id, Some(value)).await;
        Ok(true)
    }

    /// Deletes a row. Returns false if there was no such row.
    pub async fn delete(&mut self, table: &str, id: i64) -> Result<bool> {
        Ok(self.write_row(table, id, None).await)
    }

    /// Counts the rows of a table visible to this handle.
    pub async fn count(&self, table: &str) -> usize {
        match &self.tx {
            Some(tx) => tx.working.table(table).map_or(0, BTreeMap::len),
            None => self
                .shared
                .read()
                .await
                .tables
                .table(table)
                .map_or(0, BTreeMap::len),
        }
    }

    async fn scan<T: DeserializeOwned>(&mut self, scan: Scan) -> Result<Vec<(i64, T)>> {
        let rows = match &mut self.tx {
            Some(tx) => {
                let rows = scan.rows(&tx.working);
                if !tx.scans.contains(&scan) {
                    tx.scans.push(scan);
                }
                rows
            }
            None => scan.rows(&self.shared.read().await.tables),
        };
        rows.into_iter()
            .map(|(id, value)| Ok((id, serde_json::from_value(value)?)))
            .collect()
    }

    async fn next_id(&self, table: &str) -> i64 {
        let mut shared = self.shared.write().await;
        let seq = shared.sequences.entry(table.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    async fn write_row(&mut self, table: &str, id: i64, value: Option<serde_json::Value>) -> bool {
        match &mut self.tx {
            Some(tx) => {
                tx.dirty.insert((table.to_string(), id));
                tx.working.put(table, id, value)
            }
            None => self.shared.write().await.tables.put(table, id, value),
        }
    }

    fn tx_mut(&mut self) -> Result<&mut TxState> {
        self.tx.as_mut().ok_or(StoreError::NoActiveTransaction)
    }
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<()> {
        validate_savepoint_name(name)?;
        let tx = self.tx_mut()?;
        let savepoint = SavepointState {
            name: name.to_string(),
            working: tx.working.clone(),
            dirty: tx.dirty.clone(),
        };
        tx.savepoints.push(savepoint);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        let tx = self.tx_mut()?;
        let index = tx.position(name)?;
        tx.savepoints.truncate(index + 1);
        let savepoint = &tx.savepoints[index];
        tx.working = savepoint.working.clone();
        tx.dirty = savepoint.dirty.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<()> {
        let tx = self.tx_mut()?;
        let index = tx.position(name)?;
        tx.savepoints.truncate(index);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let Some(tx) = self.tx else {
            return Ok(());
        };

        let mut shared = self.shared.write().await;
        if std::mem::take(&mut shared.fail_next_commit) {
            return Err(StoreError::Commit(sqlx::Error::Protocol(
                "injected commit failure".to_string(),
            )));
        }

        // A read-only transaction saw one consistent snapshot and has nothing to apply.
        if tx.dirty.is_empty() {
            return Ok(());
        }
        if let Some(conflict) = tx.first_conflict(&shared.tables) {
            return Err(StoreError::Conflict(conflict));
        }

        for (table, id) in tx.dirty {
            let value = tx.working.get(&table, id).cloned();
            shared.tables.put(&table, id, value);
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        if self.tx.is_none() {
            return Ok(());
        }

        let mut shared = self.shared.write().await;
        if std::mem::take(&mut shared.fail_next_rollback) {
            return Err(StoreError::Rollback(sqlx::Error::Protocol(
                "injected rollback failure".to_string(),
            )));
        }
        Ok(())
    }
}
