//! Backend adapters
//!
//! One adapter per engine, all behind the [`DataAdapter`] contract. The
//! facade holds exactly one adapter and never branches on the engine;
//! every behavioral difference between backends is either absorbed here
//! or surfaced through [`AdapterCapabilities`].

use async_trait::async_trait;

use crate::config::EngineKind;
use crate::error::UdomResult;
use crate::transaction::TxCapability;
use crate::types::{OrderBy, Predicate, QueryResult, Record, RecordId};

pub mod dialect;
pub mod mongodb;
pub mod mssql;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

/// Bulk-create atomicity the adapter provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateManyPolicy {
    /// All records land or none do.
    Atomic,
    /// Records are inserted independently; the first failure stops the
    /// batch and the result reports how many landed before it.
    BestEffort,
}

/// What the backend can and cannot do, declared up front.
#[derive(Debug, Clone, Copy)]
pub struct AdapterCapabilities {
    pub transactions: bool,
    pub create_many: CreateManyPolicy,
}

/// Outcome of a bulk create.
#[derive(Debug, Clone)]
pub struct CreateManyOutcome {
    pub ids: Vec<Option<RecordId>>,
}

/// Uniform data contract implemented by every backend.
///
/// While a transaction is open the adapter routes every operation through
/// its dedicated transaction handle; otherwise each call borrows from the
/// pool independently.
#[async_trait]
pub trait DataAdapter: Send + Sync {
    fn engine(&self) -> EngineKind;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Persists one record, provisioning the entity on first write where
    /// the engine needs it. Returns the engine-assigned identifier when
    /// one can be observed.
    async fn create(&self, entity: &str, record: &Record) -> UdomResult<Option<RecordId>>;

    /// Bulk create under the adapter's [`CreateManyPolicy`].
    async fn create_many(&self, entity: &str, records: &[Record]) -> UdomResult<CreateManyOutcome>;

    async fn find(
        &self,
        entity: &str,
        predicate: &Predicate,
        order_by: Option<&OrderBy>,
        limit: Option<u64>,
    ) -> UdomResult<Vec<Record>>;

    /// Applies `changes` to every matching record; returns the match count.
    async fn update(
        &self,
        entity: &str,
        changes: &Record,
        predicate: &Predicate,
    ) -> UdomResult<u64>;

    /// Removes matching records; returns the removed count. Zero matches is
    /// a successful no-op.
    async fn delete(&self, entity: &str, predicate: &Predicate) -> UdomResult<u64>;

    /// Runs a native command verbatim (SQL text, or a JSON operation
    /// document for MongoDB). No translation, no entity provisioning.
    async fn execute(&self, command: &str) -> UdomResult<QueryResult>;

    /// Opens the unit of work. Non-transactional backends succeed and
    /// report [`TxCapability::NonTransactional`] instead of failing.
    async fn begin(&self) -> UdomResult<TxCapability>;

    async fn commit(&self) -> UdomResult<()>;

    async fn rollback(&self) -> UdomResult<()>;
}
