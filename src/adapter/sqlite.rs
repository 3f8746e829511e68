// SPDX-License-Identifier: Apache-2.0

//! SQLite adapter
//!
//! File-based relational backend over SQLx.
//!
//! ## Transaction handling
//!
//! A dedicated connection is acquired from the pool on `begin` and held
//! until `commit`/`rollback`; while it is held, every operation routes
//! through it so the unit of work sees its own writes.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteQueryResult, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::Mutex;

use crate::adapter::dialect::{SqlDialect, Statement};
use crate::adapter::{AdapterCapabilities, CreateManyOutcome, CreateManyPolicy, DataAdapter};
use crate::config::EngineKind;
use crate::error::{UdomError, UdomResult};
use crate::transaction::TxCapability;
use crate::types::{
    ColumnInfo, OrderBy, Predicate, QueryResult, Record, RecordId, Row as QRow, Value,
};

const DIALECT: SqlDialect = SqlDialect::Sqlite;

pub struct SqliteAdapter {
    pool: SqlitePool,
    transaction_conn: Mutex<Option<PoolConnection<Sqlite>>>,
}

impl SqliteAdapter {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            transaction_conn: Mutex::new(None),
        }
    }

    /// Helper to bind a Value to a SQLite query
    fn bind_param<'q>(
        query: sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Json(j) => query.bind(j.to_string()),
        }
    }

    /// Extracts a value from a SqliteRow at the given index
    ///
    /// SQLite has dynamic typing, so we try multiple types in order of likelihood
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        Value::Null
    }

    /// Converts a SQLx row into a normalized record keyed by column name.
    fn convert_record(row: &SqliteRow) -> Record {
        row.columns()
            .iter()
            .map(|col| {
                (
                    col.name().to_string(),
                    Self::extract_value(row, col.ordinal()),
                )
            })
            .collect()
    }

    fn column_info(row: &SqliteRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
                nullable: true,
            })
            .collect()
    }

    fn returns_rows(sql: &str) -> bool {
        let head = sql.trim_start().to_uppercase();
        ["SELECT", "WITH", "PRAGMA", "EXPLAIN"]
            .iter()
            .any(|kw| head.starts_with(kw))
    }

    async fn exec_stmt(&self, entity: &str, stmt: &Statement) -> UdomResult<SqliteQueryResult> {
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.params {
            query = Self::bind_param(query, value);
        }

        let mut tx_guard = self.transaction_conn.lock().await;
        if let Some(ref mut conn) = *tx_guard {
            query.execute(&mut **conn).await
        } else {
            query.execute(&self.pool).await
        }
        .map_err(|e| UdomError::from_sqlx(entity, e))
    }

    async fn exec_on(
        conn: &mut sqlx::SqliteConnection,
        entity: &str,
        stmt: &Statement,
    ) -> UdomResult<SqliteQueryResult> {
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.params {
            query = Self::bind_param(query, value);
        }
        query
            .execute(conn)
            .await
            .map_err(|e| UdomError::from_sqlx(entity, e))
    }

    async fn fetch_stmt(&self, entity: &str, stmt: &Statement) -> UdomResult<Vec<SqliteRow>> {
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.params {
            query = Self::bind_param(query, value);
        }

        let mut tx_guard = self.transaction_conn.lock().await;
        if let Some(ref mut conn) = *tx_guard {
            query.fetch_all(&mut **conn).await
        } else {
            query.fetch_all(&self.pool).await
        }
        .map_err(|e| UdomError::from_sqlx(entity, e))
    }

    /// Provisions the entity's table from the record's shape.
    async fn ensure_table(&self, entity: &str, sample: &Record) -> UdomResult<()> {
        let ddl = DIALECT.render_create_table(entity, sample)?;
        self.exec_stmt(
            entity,
            &Statement {
                sql: ddl,
                params: Vec::new(),
            },
        )
        .await?;
        Ok(())
    }

    fn record_id(record: &Record, result: &SqliteQueryResult) -> Option<RecordId> {
        // A caller-supplied id wins; otherwise report the assigned rowid.
        if let Some(value) = record.get("id") {
            if let Some(id) = Option::<RecordId>::from(value) {
                return Some(id);
            }
        }
        Some(RecordId::Int(result.last_insert_rowid()))
    }
}

#[async_trait]
impl DataAdapter for SqliteAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            transactions: true,
            create_many: CreateManyPolicy::Atomic,
        }
    }

    async fn create(&self, entity: &str, record: &Record) -> UdomResult<Option<RecordId>> {
        self.ensure_table(entity, record).await?;
        let stmt = DIALECT.render_insert(entity, record)?;
        let result = self.exec_stmt(entity, &stmt).await?;
        Ok(Self::record_id(record, &result))
    }

    async fn create_many(&self, entity: &str, records: &[Record]) -> UdomResult<CreateManyOutcome> {
        if records.is_empty() {
            return Ok(CreateManyOutcome { ids: Vec::new() });
        }
        self.ensure_table(entity, &records[0]).await?;

        // Inside an open transaction the caller's unit of work already
        // provides atomicity; otherwise the batch gets its own transaction
        // on one dedicated connection.
        let mut tx_guard = self.transaction_conn.lock().await;
        if let Some(ref mut conn) = *tx_guard {
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let stmt = DIALECT.render_insert(entity, record)?;
                let result = Self::exec_on(&mut **conn, entity, &stmt).await?;
                ids.push(Self::record_id(record, &result));
            }
            return Ok(CreateManyOutcome { ids });
        }
        drop(tx_guard);

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| UdomError::from_sqlx(entity, e))?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| UdomError::from_sqlx(entity, e))?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let stmt = DIALECT.render_insert(entity, record)?;
            match Self::exec_on(&mut *conn, entity, &stmt).await {
                Ok(result) => ids.push(Self::record_id(record, &result)),
                Err(err) => {
                    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                    return Err(err);
                }
            }
        }

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(|e| UdomError::from_sqlx(entity, e))?;
        Ok(CreateManyOutcome { ids })
    }

    async fn find(
        &self,
        entity: &str,
        predicate: &Predicate,
        order_by: Option<&OrderBy>,
        limit: Option<u64>,
    ) -> UdomResult<Vec<Record>> {
        let stmt = DIALECT.render_select(entity, predicate, order_by, limit)?;
        let rows = self.fetch_stmt(entity, &stmt).await?;
        Ok(rows.iter().map(Self::convert_record).collect())
    }

    async fn update(
        &self,
        entity: &str,
        changes: &Record,
        predicate: &Predicate,
    ) -> UdomResult<u64> {
        let stmt = DIALECT.render_update(entity, changes, predicate)?;
        let result = self.exec_stmt(entity, &stmt).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, entity: &str, predicate: &Predicate) -> UdomResult<u64> {
        let stmt = DIALECT.render_delete(entity, predicate)?;
        let result = self.exec_stmt(entity, &stmt).await?;
        Ok(result.rows_affected())
    }

    async fn execute(&self, command: &str) -> UdomResult<QueryResult> {
        let start = Instant::now();
        let stmt = Statement {
            sql: command.to_string(),
            params: Vec::new(),
        };

        if Self::returns_rows(command) {
            let rows = self.fetch_stmt("", &stmt).await?;
            let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
            if rows.is_empty() {
                return Ok(QueryResult {
                    execution_time_ms,
                    ..QueryResult::empty()
                });
            }
            Ok(QueryResult {
                columns: Self::column_info(&rows[0]),
                rows: rows
                    .iter()
                    .map(|row| QRow {
                        values: (0..row.columns().len())
                            .map(|i| Self::extract_value(row, i))
                            .collect(),
                    })
                    .collect(),
                affected_rows: None,
                execution_time_ms,
            })
        } else {
            let result = self.exec_stmt("", &stmt).await?;
            Ok(QueryResult::with_affected_rows(
                result.rows_affected(),
                start.elapsed().as_micros() as f64 / 1000.0,
            ))
        }
    }

    async fn begin(&self) -> UdomResult<TxCapability> {
        let mut tx = self.transaction_conn.lock().await;
        if tx.is_some() {
            return Err(UdomError::transaction_state(
                "A transaction is already active on this session",
            ));
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| UdomError::from_sqlx("", e))?;

        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| UdomError::execution(format!("Failed to begin transaction: {}", e)))?;

        *tx = Some(conn);
        Ok(TxCapability::Transactional)
    }

    async fn commit(&self) -> UdomResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        let mut conn = tx
            .take()
            .ok_or_else(|| UdomError::transaction_state("No active transaction to commit"))?;

        sqlx::query("COMMIT")
            .execute(&mut *conn)
            .await
            .map_err(|e| UdomError::execution(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    async fn rollback(&self) -> UdomResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        let mut conn = tx
            .take()
            .ok_or_else(|| UdomError::transaction_state("No active transaction to rollback"))?;

        sqlx::query("ROLLBACK")
            .execute(&mut *conn)
            .await
            .map_err(|e| UdomError::execution(format!("Failed to rollback transaction: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::tempdir;

    async fn adapter(dir: &tempfile::TempDir) -> SqliteAdapter {
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("test.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap();
        SqliteAdapter::new(pool)
    }

    #[tokio::test]
    async fn create_provisions_table_and_assigns_id() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir).await;

        let rec = Record::new().with_field("name", "ada").with_field("age", 36i64);
        let id = adapter.create("users", &rec).await.unwrap();
        assert_eq!(id, Some(RecordId::Int(1)));

        let found = adapter
            .find("users", &Predicate::new().eq("name", "ada"), None, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("age"), Some(&Value::Int(36)));
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir).await;

        let rec = Record::new().with_field("name", "ada");
        adapter.create("users", &rec).await.unwrap();

        adapter.begin().await.unwrap();
        adapter
            .create("users", &Record::new().with_field("name", "grace"))
            .await
            .unwrap();
        adapter.rollback().await.unwrap();

        let all = adapter
            .find("users", &Predicate::match_all(), None, None)
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn create_many_rolls_back_on_failure() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir).await;

        adapter
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, sku TEXT UNIQUE)")
            .await
            .unwrap();

        let batch = vec![
            Record::new().with_field("sku", "a-1"),
            Record::new().with_field("sku", "a-2"),
            Record::new().with_field("sku", "a-1"),
        ];
        let err = adapter.create_many("items", &batch).await.unwrap_err();
        assert!(matches!(err, UdomError::ConstraintViolation { .. }));

        let remaining = adapter
            .find("items", &Predicate::match_all(), None, None)
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn execute_classifies_selects() {
        let dir = tempdir().unwrap();
        let adapter = adapter(&dir).await;

        let result = adapter
            .execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        assert!(result.affected_rows.is_some());

        adapter
            .execute("INSERT INTO t (name) VALUES ('hello')")
            .await
            .unwrap();

        let result = adapter.execute("SELECT * FROM t").await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.columns.len(), 2);
    }
}
