// SPDX-License-Identifier: Apache-2.0

//! SQL Server adapter
//!
//! Uses `bb8::Pool<bb8_tiberius::ConnectionManager>` for pooling and
//! renders statements with inline literals through `simple_query`.
//!
//! ## Transaction handling
//!
//! bb8 does not allow moving a pooled client out of the pool, so `begin`
//! opens a dedicated raw tiberius client outside the pool and holds it
//! until `commit`/`rollback`. While it is held, every operation routes
//! through it.

use async_trait::async_trait;
use std::time::Instant;
use tiberius::{AuthMethod, Client, ColumnData, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::adapter::dialect::SqlDialect;
use crate::adapter::{AdapterCapabilities, CreateManyOutcome, CreateManyPolicy, DataAdapter};
use crate::config::{EngineKind, TargetConfig};
use crate::error::{UdomError, UdomResult};
use crate::transaction::TxCapability;
use crate::types::{
    ColumnInfo, OrderBy, Predicate, QueryResult, Record, RecordId, Row as QRow, Value,
};

const DIALECT: SqlDialect = SqlDialect::Mssql;

type MssqlPool = bb8::Pool<bb8_tiberius::ConnectionManager>;
type MssqlClient = Client<Compat<TcpStream>>;

pub struct MssqlAdapter {
    pool: MssqlPool,
    /// Raw client held while a transaction is open.
    transaction_conn: Mutex<Option<MssqlClient>>,
    /// Config for opening the dedicated transaction client.
    config: Config,
    acquire_timeout_ms: u64,
}

impl MssqlAdapter {
    pub fn new(pool: MssqlPool, target: &TargetConfig) -> UdomResult<Self> {
        Ok(Self {
            pool,
            transaction_conn: Mutex::new(None),
            config: Self::build_config(target)?,
            acquire_timeout_ms: target.pool_acquire_timeout.as_millis() as u64,
        })
    }

    fn build_config(target: &TargetConfig) -> UdomResult<Config> {
        let parts = target.mssql_parts()?;
        let mut config = Config::new();
        config.host(&parts.host);
        config.port(parts.port);
        config.authentication(AuthMethod::sql_server(&parts.username, &parts.password));
        if let Some(database) = &parts.database {
            config.database(database);
        }
        config.trust_cert();
        Ok(config)
    }

    async fn connect_raw(&self) -> UdomResult<MssqlClient> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| UdomError::connection_failed(e.to_string()))?;
        tcp.set_nodelay(true).ok();

        Client::connect(self.config.clone(), tcp.compat_write())
            .await
            .map_err(|e| UdomError::connection_failed(e.to_string()))
    }

    fn map_pool_error(&self, err: bb8::RunError<bb8_tiberius::Error>) -> UdomError {
        match err {
            bb8::RunError::TimedOut => UdomError::PoolTimeout {
                timeout_ms: self.acquire_timeout_ms,
            },
            bb8::RunError::User(e) => UdomError::connection_failed(e.to_string()),
        }
    }

    async fn query_rows(&self, entity: &str, sql: &str) -> UdomResult<Vec<tiberius::Row>> {
        let mut tx_guard = self.transaction_conn.lock().await;
        if let Some(ref mut client) = *tx_guard {
            run_query(client, entity, sql).await
        } else {
            let mut conn = self.pool.get().await.map_err(|e| self.map_pool_error(e))?;
            run_query(&mut *conn, entity, sql).await
        }
    }

    async fn exec_sql(&self, entity: &str, sql: &str) -> UdomResult<u64> {
        let mut tx_guard = self.transaction_conn.lock().await;
        if let Some(ref mut client) = *tx_guard {
            run_exec(client, entity, sql).await
        } else {
            let mut conn = self.pool.get().await.map_err(|e| self.map_pool_error(e))?;
            run_exec(&mut *conn, entity, sql).await
        }
    }

    async fn ensure_table(&self, entity: &str, sample: &Record) -> UdomResult<()> {
        let ddl = DIALECT.render_create_table(entity, sample)?;
        self.exec_sql(entity, &ddl).await?;
        Ok(())
    }

    /// INSERT followed by SCOPE_IDENTITY() on the same batch, so the
    /// assigned id is read from the same connection scope.
    fn insert_sql(entity: &str, record: &Record) -> UdomResult<String> {
        let stmt = DIALECT.render_insert(entity, record)?;
        Ok(format!(
            "{}; SELECT CAST(SCOPE_IDENTITY() AS BIGINT) AS [id]",
            stmt.sql
        ))
    }

    fn record_id(record: &Record, returned: &[tiberius::Row]) -> Option<RecordId> {
        if let Some(value) = record.get("id") {
            if let Some(id) = Option::<RecordId>::from(value) {
                return Some(id);
            }
        }
        returned
            .first()
            .and_then(|row| row.try_get::<i64, _>(0).ok().flatten())
            .map(RecordId::Int)
    }

    async fn insert_one(&self, entity: &str, record: &Record) -> UdomResult<Option<RecordId>> {
        let sql = Self::insert_sql(entity, record)?;
        let rows = self.query_rows(entity, &sql).await?;
        Ok(Self::record_id(record, &rows))
    }

    fn returns_rows(sql: &str) -> bool {
        let head = sql.trim_start().to_uppercase();
        ["SELECT", "WITH", "EXEC", "DECLARE"]
            .iter()
            .any(|kw| head.starts_with(kw))
    }
}

async fn run_query(
    client: &mut MssqlClient,
    entity: &str,
    sql: &str,
) -> UdomResult<Vec<tiberius::Row>> {
    let stream = client
        .simple_query(sql)
        .await
        .map_err(|e| UdomError::from_tiberius(entity, e))?;
    let results = stream
        .into_results()
        .await
        .map_err(|e| UdomError::from_tiberius(entity, e))?;
    // Multi-statement batches report the last result set.
    Ok(results.into_iter().last().unwrap_or_default())
}

async fn run_exec(client: &mut MssqlClient, entity: &str, sql: &str) -> UdomResult<u64> {
    let result = client
        .execute(sql, &[])
        .await
        .map_err(|e| UdomError::from_tiberius(entity, e))?;
    Ok(result.total())
}

/// Convert a tiberius ColumnData to a normalized Value.
fn convert_column_data(data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::Bit(Some(b)) => Value::Bool(*b),
        ColumnData::U8(Some(v)) => Value::Int(*v as i64),
        ColumnData::I16(Some(v)) => Value::Int(*v as i64),
        ColumnData::I32(Some(v)) => Value::Int(*v as i64),
        ColumnData::I64(Some(v)) => Value::Int(*v),
        ColumnData::F32(Some(v)) => Value::Float(*v as f64),
        ColumnData::F64(Some(v)) => Value::Float(*v),
        ColumnData::Numeric(Some(n)) => {
            let val = n.value() as f64 / 10f64.powi(n.scale() as i32);
            Value::Float(val)
        }
        ColumnData::String(Some(s)) => Value::Text(s.to_string()),
        ColumnData::Guid(Some(g)) => Value::Text(format!("{}", g)),
        ColumnData::Xml(Some(xml)) => Value::Text(xml.to_string()),
        _ => Value::Null,
    }
}

/// Cell conversion with chrono getters for the date/time column types.
fn convert_cell(row: &tiberius::Row, idx: usize, data: &ColumnData<'_>) -> Value {
    match data {
        ColumnData::DateTime(Some(_))
        | ColumnData::SmallDateTime(Some(_))
        | ColumnData::DateTime2(Some(_)) => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        ColumnData::DateTimeOffset(Some(_)) => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| Value::Text(dt.to_rfc3339()))
            .unwrap_or(Value::Null),
        ColumnData::Date(Some(_)) => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .flatten()
            .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        ColumnData::Time(Some(_)) => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| Value::Text(t.format("%H:%M:%S%.f").to_string()))
            .unwrap_or(Value::Null),
        _ => convert_column_data(data),
    }
}

fn convert_record(row: &tiberius::Row) -> Record {
    row.cells()
        .enumerate()
        .map(|(i, (col, data))| (col.name().to_string(), convert_cell(row, i, data)))
        .collect()
}

fn convert_row(row: &tiberius::Row) -> QRow {
    QRow {
        values: row
            .cells()
            .enumerate()
            .map(|(i, (_col, data))| convert_cell(row, i, data))
            .collect(),
    }
}

fn column_info(columns: &[tiberius::Column]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|col| ColumnInfo {
            name: col.name().to_string(),
            data_type: format!("{:?}", col.column_type()),
            nullable: true,
        })
        .collect()
}

#[async_trait]
impl DataAdapter for MssqlAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Mssql
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            transactions: true,
            create_many: CreateManyPolicy::Atomic,
        }
    }

    async fn create(&self, entity: &str, record: &Record) -> UdomResult<Option<RecordId>> {
        self.ensure_table(entity, record).await?;
        self.insert_one(entity, record).await
    }

    async fn create_many(&self, entity: &str, records: &[Record]) -> UdomResult<CreateManyOutcome> {
        if records.is_empty() {
            return Ok(CreateManyOutcome { ids: Vec::new() });
        }
        self.ensure_table(entity, &records[0]).await?;

        let mut tx_guard = self.transaction_conn.lock().await;
        if let Some(ref mut client) = *tx_guard {
            let mut ids = Vec::with_capacity(records.len());
            for record in records {
                let sql = Self::insert_sql(entity, record)?;
                let rows = run_query(client, entity, &sql).await?;
                ids.push(Self::record_id(record, &rows));
            }
            return Ok(CreateManyOutcome { ids });
        }
        drop(tx_guard);

        // Dedicated raw client so the batch transaction lives on one
        // connection.
        let mut client = self.connect_raw().await?;
        run_exec(&mut client, entity, "BEGIN TRANSACTION").await?;

        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let sql = Self::insert_sql(entity, record)?;
            match run_query(&mut client, entity, &sql).await {
                Ok(rows) => ids.push(Self::record_id(record, &rows)),
                Err(err) => {
                    let _ = run_exec(&mut client, entity, "ROLLBACK").await;
                    return Err(err);
                }
            }
        }

        run_exec(&mut client, entity, "COMMIT").await?;
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
        let rows = self.query_rows(entity, &stmt.sql).await?;
        Ok(rows.iter().map(convert_record).collect())
    }

    async fn update(
        &self,
        entity: &str,
        changes: &Record,
        predicate: &Predicate,
    ) -> UdomResult<u64> {
        let stmt = DIALECT.render_update(entity, changes, predicate)?;
        self.exec_sql(entity, &stmt.sql).await
    }

    async fn delete(&self, entity: &str, predicate: &Predicate) -> UdomResult<u64> {
        let stmt = DIALECT.render_delete(entity, predicate)?;
        self.exec_sql(entity, &stmt.sql).await
    }

    async fn execute(&self, command: &str) -> UdomResult<QueryResult> {
        let start = Instant::now();

        if Self::returns_rows(command) {
            let rows = self.query_rows("", command).await?;
            let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
            if rows.is_empty() {
                return Ok(QueryResult {
                    execution_time_ms,
                    ..QueryResult::empty()
                });
            }
            Ok(QueryResult {
                columns: column_info(rows[0].columns()),
                rows: rows.iter().map(convert_row).collect(),
                affected_rows: None,
                execution_time_ms,
            })
        } else {
            let affected = self.exec_sql("", command).await?;
            Ok(QueryResult::with_affected_rows(
                affected,
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

        let mut client = self.connect_raw().await?;
        run_exec(&mut client, "", "BEGIN TRANSACTION")
            .await
            .map_err(|e| UdomError::execution(format!("Failed to begin transaction: {}", e)))?;

        *tx = Some(client);
        Ok(TxCapability::Transactional)
    }

    async fn commit(&self) -> UdomResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        let mut client = tx
            .take()
            .ok_or_else(|| UdomError::transaction_state("No active transaction to commit"))?;

        run_exec(&mut client, "", "COMMIT")
            .await
            .map_err(|e| UdomError::execution(format!("Failed to commit transaction: {}", e)))?;
        Ok(())
    }

    async fn rollback(&self) -> UdomResult<()> {
        let mut tx = self.transaction_conn.lock().await;
        let mut client = tx
            .take()
            .ok_or_else(|| UdomError::transaction_state("No active transaction to rollback"))?;

        run_exec(&mut client, "", "ROLLBACK")
            .await
            .map_err(|e| UdomError::execution(format!("Failed to rollback transaction: {}", e)))?;
        Ok(())
    }
}
