use std::collections::BTreeMap;

use rusqlite::types::Value;
use tracing::{trace, warn};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Incoming non-key values replace persisted ones.
    Overwrite,
    /// A persisted value is only written while it is null or empty.
    FillIfEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Table layout: natural-key columns followed by value columns.
#[derive(Debug)]
pub struct Table {
    pub name: &'static str,
    pub key: &'static [&'static str],
    pub values: &'static [&'static str],
    pub policy: MergePolicy,
}

/// A record that can be reconciled by natural key.
pub trait Record {
    fn table() -> &'static Table;
    fn key(&self) -> Vec<Value>;
    fn values(&self) -> Vec<Value>;
}

/// The persistence capability the sink needs. Null key parts compare equal
/// to null (SQL `IS` semantics).
pub trait Backend {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;
    fn load(&mut self, table: &Table, key: &[Value]) -> Result<Option<Vec<Value>>, StoreError>;
    fn insert(&mut self, table: &Table, key: &[Value], values: &[Value]) -> Result<(), StoreError>;
    fn update(&mut self, table: &Table, key: &[Value], values: &[Value]) -> Result<(), StoreError>;
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Text(t) => t.is_empty(),
        _ => false,
    }
}

pub fn merge(policy: MergePolicy, existing: &[Value], incoming: &[Value]) -> Vec<Value> {
    match policy {
        MergePolicy::Overwrite => incoming.to_vec(),
        MergePolicy::FillIfEmpty => existing
            .iter()
            .zip(incoming)
            .map(|(old, new)| if is_empty(old) { new.clone() } else { old.clone() })
            .collect(),
    }
}

/// Reconciles records against persisted state, one atomic unit per record.
pub struct UpsertSink<B> {
    backend: B,
}

impl<B: Backend> UpsertSink<B> {
    pub fn new(backend: B) -> Self {
        UpsertSink { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Merge `record` into the persisted row under the table's policy, or
    /// insert it when its key is new.
    pub fn apply<R: Record>(&mut self, record: &R) -> Result<UpsertOutcome, StoreError> {
        self.transact(|backend| reconcile(backend, record))
    }

    /// Insert `record` only when its key is new. An existing row is never
    /// touched, whatever the table's policy.
    pub fn insert_if_absent<R: Record>(&mut self, record: &R) -> Result<UpsertOutcome, StoreError> {
        self.transact(|backend| {
            let (table, key, values) = checked(record)?;
            if backend.load(table, &key)?.is_some() {
                return Ok(UpsertOutcome::Unchanged);
            }
            backend.insert(table, &key, &values)?;
            trace!("{} {:?} -> inserted", table.name, key);
            Ok(UpsertOutcome::Inserted)
        })
    }

    fn transact<F>(&mut self, work: F) -> Result<UpsertOutcome, StoreError>
    where
        F: FnOnce(&mut B) -> Result<UpsertOutcome, StoreError>,
    {
        self.backend.begin()?;
        let result = work(&mut self.backend).and_then(|outcome| {
            self.backend.commit()?;
            Ok(outcome)
        });
        if result.is_err() {
            if let Err(e) = self.backend.rollback() {
                warn!("rollback failed: {}", e);
            }
        }
        result
    }
}

fn checked<R: Record>(record: &R) -> Result<(&'static Table, Vec<Value>, Vec<Value>), StoreError> {
    let table = R::table();
    let key = record.key();
    let values = record.values();
    if key.len() != table.key.len() || values.len() != table.values.len() {
        return Err(StoreError::Arity {
            table: table.name,
            expected: table.key.len() + table.values.len(),
            got: key.len() + values.len(),
        });
    }
    Ok((table, key, values))
}

fn reconcile<B: Backend, R: Record>(backend: &mut B, record: &R) -> Result<UpsertOutcome, StoreError> {
    let (table, key, incoming) = checked(record)?;
    let outcome = match backend.load(table, &key)? {
        None => {
            backend.insert(table, &key, &incoming)?;
            UpsertOutcome::Inserted
        }
        Some(existing) => {
            let merged = merge(table.policy, &existing, &incoming);
            if merged == existing {
                UpsertOutcome::Unchanged
            } else {
                backend.update(table, &key, &merged)?;
                UpsertOutcome::Updated
            }
        }
    };
    trace!("{} {:?} -> {:?}", table.name, key, outcome);
    Ok(outcome)
}

// ── In-memory backend ──

type Rows = Vec<(Vec<Value>, Vec<Value>)>;

/// Keeps everything in memory. Used for dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    tables: BTreeMap<&'static str, Rows>,
    snapshot: Option<BTreeMap<&'static str, Rows>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::default()
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map(Vec::len).unwrap_or(0)
    }

    pub fn rows(&self, table: &str) -> &[(Vec<Value>, Vec<Value>)] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    fn position(&self, table: &Table, key: &[Value]) -> Option<usize> {
        self.tables
            .get(table.name)?
            .iter()
            .position(|(k, _)| k.as_slice() == key)
    }
}

impl Backend for MemoryBackend {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        if let Some(s) = self.snapshot.take() {
            self.tables = s;
        }
        Ok(())
    }

    fn load(&mut self, table: &Table, key: &[Value]) -> Result<Option<Vec<Value>>, StoreError> {
        Ok(self
            .position(table, key)
            .map(|i| self.tables[table.name][i].1.clone()))
    }

    fn insert(&mut self, table: &Table, key: &[Value], values: &[Value]) -> Result<(), StoreError> {
        self.tables
            .entry(table.name)
            .or_default()
            .push((key.to_vec(), values.to_vec()));
        Ok(())
    }

    fn update(&mut self, table: &Table, key: &[Value], values: &[Value]) -> Result<(), StoreError> {
        if let Some(i) = self.position(table, key) {
            if let Some(rows) = self.tables.get_mut(table.name) {
                rows[i].1 = values.to_vec();
            }
        }
        Ok(())
    }
}
