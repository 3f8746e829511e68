// SPDX-License-Identifier: Apache-2.0

//! MySQL / MariaDB adapter
//!
//! Same architecture as SQLite: a dedicated transaction connection is
//! acquired on `begin` and routes every operation until finalization.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlQueryResult, MySqlRow};
use sqlx::pool::PoolConnection;
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

const DIALECT: SqlDialect = SqlDialect::MySql;

pub struct MySqlAdapter {
    pool: MySqlPool,
    transaction_conn: Mutex<Option<PoolConnection<MySql>>>,
}

impl MySqlAdapter {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            transaction_conn: Mutex::new(None),
        }
    }

    fn bind_param<'q>(
        query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
        value: &'q Value,
    ) -> sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments> {
        match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(b),
            Value::Int(i) => query.bind(i),
            Value::Float(f) => query.bind(f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Json(j) => query.bind(j.to_string()),
        }
    }

    fn extract_value(row: &MySqlRow, idx: usize) -> Value {
        // Try u64 first for BIGINT UNSIGNED columns
        if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
            return v.map(|u| Value::Int(u as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v.map(|f| Value::Float(f as f64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.to_rfc3339()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        Value::Null
    }

    fn convert_record(row: &MySqlRow) -> Record {
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

    fn column_info(row: &MySqlRow) -> Vec<ColumnInfo> {
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
        ["SELECT", "WITH", "SHOW", "DESCRIBE", "EXPLAIN"]
            .iter()
            .any(|kw| head.starts_with(kw))
    }

    async fn exec_stmt(&self, entity: &str, stmt: &Statement) -> UdomResult<MySqlQueryResult> {
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
        conn: &mut sqlx::MySqlConnection,
        entity: &str,
        stmt: &Statement,
    ) -> UdomResult<MySqlQueryResult> {
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.params {
            query = Self::bind_param(query, value);
        }
        query
            .execute(conn)
            .await
            .map_err(|e| UdomError::from_sqlx(entity, e))
    }

    async fn fetch_stmt(&self, entity: &str, stmt: &Statement) -> UdomResult<Vec<MySqlRow>> {
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

    fn record_id(record: &Record, result: &MySqlQueryResult) -> Option<RecordId> {
        if let Some(value) = record.get("id") {
            if let Some(id) = Option::<RecordId>::from(value) {
                return Some(id);
            }
        }
        match result.last_insert_id() {
            0 => None,
            id => Some(RecordId::Int(id as i64)),
        }
    }
}

#[async_trait]
impl DataAdapter for MySqlAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::MySql
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
