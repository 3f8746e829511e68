//! Universal data object model facade
//!
//! One `Udom` handle per logical session: it owns one adapter over a
//! shared pool plus the session's transaction context. Handles are cheap
//! to clone; clones share the adapter and the transaction, so a scoped
//! transaction block can hand a clone to the closure.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::adapter::mongodb::MongoAdapter;
use crate::adapter::mssql::MssqlAdapter;
use crate::adapter::mysql::MySqlAdapter;
use crate::adapter::postgres::PostgresAdapter;
use crate::adapter::sqlite::SqliteAdapter;
use crate::adapter::{AdapterCapabilities, CreateManyOutcome, DataAdapter};
use crate::config::{EngineKind, TargetConfig};
use crate::error::{UdomError, UdomResult};
use crate::manager::{self, ConnectionManager, EnginePool};
use crate::observe;
use crate::transaction::{TransactionContext, TxCapability, TxState};
use crate::types::{OrderBy, Predicate, QueryResult, Record, RecordId};
use crate::uql::{self, UqlCommand};

/// Result of executing one UQL statement.
#[derive(Debug)]
pub enum UqlOutcome {
    Created(Option<RecordId>),
    Records(Vec<Record>),
    Updated(u64),
    Deleted(u64),
}

/// Session handle over one backend target.
#[derive(Clone)]
pub struct Udom {
    config: TargetConfig,
    adapter: Arc<dyn DataAdapter>,
    tx: Arc<Mutex<TransactionContext>>,
}

impl Udom {
    /// Connects with the `(db_type, db_instance, url)` triple.
    ///
    /// `db_type` is `"sql"` or `"nosql"` (or an engine name directly);
    /// an empty `db_instance` picks the family default.
    pub async fn connect(db_type: &str, db_instance: &str, url: &str) -> UdomResult<Self> {
        Self::open(TargetConfig::new(db_type, db_instance, url)?).await
    }

    /// Opens a session through the process-wide connection manager.
    pub async fn open(config: TargetConfig) -> UdomResult<Self> {
        Self::open_with(config, manager::global()).await
    }

    /// Opens a session through an explicit connection manager.
    #[instrument(skip(config, manager), fields(engine = %config.engine))]
    pub async fn open_with(
        config: TargetConfig,
        manager: Arc<ConnectionManager>,
    ) -> UdomResult<Self> {
        let pool = manager.pool(&config).await?;

        let adapter: Arc<dyn DataAdapter> = match pool {
            EnginePool::Sqlite(pool) => Arc::new(SqliteAdapter::new(pool)),
            EnginePool::MySql(pool) => Arc::new(MySqlAdapter::new(pool)),
            EnginePool::Postgres(pool) => Arc::new(PostgresAdapter::new(pool)),
            EnginePool::Mssql(pool) => Arc::new(MssqlAdapter::new(pool, &config)?),
            EnginePool::Mongo(client) => {
                Arc::new(MongoAdapter::connect(client, config.mongo_db_name()).await)
            }
        };

        Ok(Self {
            config,
            adapter,
            tx: Arc::new(Mutex::new(TransactionContext::new())),
        })
    }

    pub fn engine(&self) -> EngineKind {
        self.config.engine
    }

    pub fn capabilities(&self) -> AdapterCapabilities {
        self.adapter.capabilities()
    }

    /// Current transaction state of this session.
    pub async fn tx_state(&self) -> TxState {
        self.tx.lock().await.state()
    }

    // -------- data operations --------

    /// Persists one record, provisioning the entity where the engine
    /// needs it. Returns the assigned identifier when observable.
    pub async fn create(&self, entity: &str, record: &Record) -> UdomResult<Option<RecordId>> {
        let entity = normalize_entity(entity)?;
        if record.is_empty() {
            return Err(UdomError::validation("Record must not be empty"));
        }

        let started = Instant::now();
        let outcome = self.bounded(self.adapter.create(&entity, record)).await;
        observe::emit(self.engine(), "create", &entity, started, &outcome);
        outcome
    }

    /// Bulk create under the adapter's atomicity policy (atomic on
    /// relational engines, best-effort on document engines).
    pub async fn create_many(
        &self,
        entity: &str,
        records: &[Record],
    ) -> UdomResult<CreateManyOutcome> {
        let entity = normalize_entity(entity)?;
        if records.iter().any(Record::is_empty) {
            return Err(UdomError::validation("Records must not be empty"));
        }

        let started = Instant::now();
        let outcome = self.bounded(self.adapter.create_many(&entity, records)).await;
        observe::emit(self.engine(), "create_many", &entity, started, &outcome);
        outcome
    }

    /// Finds every record matching the predicate. The explicit match-all
    /// predicate returns the whole entity.
    pub async fn find(&self, entity: &str, predicate: &Predicate) -> UdomResult<Vec<Record>> {
        self.find_with(entity, predicate, None, None).await
    }

    /// `find` with ordering and a result cap.
    pub async fn find_with(
        &self,
        entity: &str,
        predicate: &Predicate,
        order_by: Option<&OrderBy>,
        limit: Option<u64>,
    ) -> UdomResult<Vec<Record>> {
        let entity = normalize_entity(entity)?;

        let started = Instant::now();
        let outcome = self
            .bounded(self.adapter.find(&entity, predicate, order_by, limit))
            .await;
        observe::emit(self.engine(), "find", &entity, started, &outcome);
        outcome
    }

    /// Applies `changes` to every matching record; returns the match
    /// count. Zero matches is a successful no-op.
    pub async fn update(
        &self,
        entity: &str,
        changes: &Record,
        predicate: &Predicate,
    ) -> UdomResult<u64> {
        let entity = normalize_entity(entity)?;
        if changes.is_empty() {
            return Err(UdomError::validation("Update changes must not be empty"));
        }

        let started = Instant::now();
        let outcome = self
            .bounded(self.adapter.update(&entity, changes, predicate))
            .await;
        observe::emit(self.engine(), "update", &entity, started, &outcome);
        outcome
    }

    /// Removes matching records; returns the removed count. The
    /// predicate is required so a full delete is always deliberate.
    pub async fn delete(&self, entity: &str, predicate: &Predicate) -> UdomResult<u64> {
        let entity = normalize_entity(entity)?;

        let started = Instant::now();
        let outcome = self.bounded(self.adapter.delete(&entity, predicate)).await;
        observe::emit(self.engine(), "delete", &entity, started, &outcome);
        outcome
    }

    /// Runs a native command verbatim: SQL text on relational targets, a
    /// JSON command document on MongoDB.
    pub async fn execute(&self, command: &str) -> UdomResult<QueryResult> {
        if command.trim().is_empty() {
            return Err(UdomError::validation("Command must not be empty"));
        }

        let started = Instant::now();
        let outcome = self.bounded(self.adapter.execute(command)).await;
        observe::emit(self.engine(), "execute", "", started, &outcome);
        outcome
    }

    // -------- UQL --------

    /// Parses and executes one UQL statement of any kind.
    pub async fn uexecute(&self, statement: &str) -> UdomResult<UqlOutcome> {
        match uql::parse(statement)? {
            UqlCommand::Create { entity, payload } => {
                let id = self.create(&entity, &payload).await?;
                Ok(UqlOutcome::Created(id))
            }
            UqlCommand::Find {
                entity,
                predicate,
                order_by,
                limit,
            } => {
                let records = self
                    .find_with(&entity, &predicate, order_by.as_ref(), limit)
                    .await?;
                Ok(UqlOutcome::Records(records))
            }
            UqlCommand::Update {
                entity,
                changes,
                predicate,
            } => {
                let count = self.update(&entity, &changes, &predicate).await?;
                Ok(UqlOutcome::Updated(count))
            }
            UqlCommand::Delete { entity, predicate } => {
                let count = self.delete(&entity, &predicate).await?;
                Ok(UqlOutcome::Deleted(count))
            }
        }
    }

    /// Executes a UQL `FIND` and returns the matching records. Mutating
    /// statements are rejected; use [`Udom::uexecute`] for those.
    pub async fn uquery(&self, statement: &str) -> UdomResult<Vec<Record>> {
        match uql::parse(statement)? {
            UqlCommand::Find {
                entity,
                predicate,
                order_by,
                limit,
            } => {
                self.find_with(&entity, &predicate, order_by.as_ref(), limit)
                    .await
            }
            other => Err(UdomError::validation(format!(
                "uquery only accepts FIND statements, got {}",
                other.operation().to_uppercase()
            ))),
        }
    }

    // -------- transactions --------

    /// Opens a unit of work on this session. On backends without
    /// multi-statement atomicity this succeeds as an observable no-op;
    /// check [`Udom::tx_state`] or the returned capability.
    #[instrument(skip(self), fields(engine = %self.config.engine))]
    pub async fn begin(&self) -> UdomResult<TxCapability> {
        let mut ctx = self.tx.lock().await;
        if ctx.is_open() {
            return Err(UdomError::transaction_state(
                "A transaction is already open on this session",
            ));
        }

        let capability = self.adapter.begin().await?;
        ctx.begin(capability)?;
        if capability == TxCapability::NonTransactional {
            warn!(
                engine = %self.config.engine,
                "backend does not support transactions; operations apply immediately"
            );
        }
        Ok(capability)
    }

    /// Commits the open unit of work. If the engine rejects the commit,
    /// the transaction is rolled back and the error says so.
    #[instrument(skip(self), fields(engine = %self.config.engine))]
    pub async fn commit(&self) -> UdomResult<()> {
        let mut ctx = self.tx.lock().await;
        if !ctx.is_open() {
            return Err(UdomError::transaction_state(
                "No open transaction to commit",
            ));
        }

        match self.adapter.commit().await {
            Ok(()) => {
                ctx.mark_committed()?;
                Ok(())
            }
            Err(err) => {
                let _ = self.adapter.rollback().await;
                ctx.abort();
                Err(UdomError::transaction_abort(format!(
                    "Commit failed and the transaction was rolled back: {}",
                    err
                )))
            }
        }
    }

    /// Rolls back the open unit of work. Returns `true` when a rollback
    /// happened; calling again after finalization is a `false` no-op.
    #[instrument(skip(self), fields(engine = %self.config.engine))]
    pub async fn rollback(&self) -> UdomResult<bool> {
        let mut ctx = self.tx.lock().await;
        match ctx.state() {
            TxState::Open => {
                // A failed engine rollback still finalizes the context;
                // the session must be able to begin a fresh transaction.
                if let Err(err) = self.adapter.rollback().await {
                    ctx.abort();
                    return Err(err);
                }
                ctx.mark_rolled_back()?;
                Ok(true)
            }
            TxState::Committed | TxState::RolledBack => Ok(false),
            TxState::Idle => Err(UdomError::transaction_state(
                "No open transaction to roll back",
            )),
        }
    }

    /// Runs the closure inside a transaction: commit on `Ok`, rollback
    /// on `Err`. The closure receives a clone sharing this session's
    /// transaction.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> UdomResult<T>
    where
        F: FnOnce(Udom) -> Fut,
        Fut: Future<Output = UdomResult<T>>,
    {
        self.begin().await?;
        match f(self.clone()).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb_err) = self.rollback().await {
                    warn!(
                        engine = %self.config.engine,
                        error = %rb_err,
                        "rollback after failed transaction block also failed"
                    );
                }
                Err(err)
            }
        }
    }

    // -------- internals --------

    async fn bounded<T, F>(&self, operation: F) -> UdomResult<T>
    where
        F: Future<Output = UdomResult<T>>,
    {
        match self.config.operation_timeout {
            Some(bound) => tokio::time::timeout(bound, operation)
                .await
                .unwrap_or(Err(UdomError::Timeout {
                    timeout_ms: bound.as_millis() as u64,
                })),
            None => operation.await,
        }
    }
}

fn normalize_entity(entity: &str) -> UdomResult<String> {
    let entity = entity.trim();
    if entity.is_empty() {
        return Err(UdomError::validation("Entity name must not be empty"));
    }
    Ok(entity.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_names_are_trimmed_and_required() {
        assert_eq!(normalize_entity("  users ").unwrap(), "users");
        assert!(normalize_entity("   ").is_err());
    }
}
