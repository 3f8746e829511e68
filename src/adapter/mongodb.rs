// SPDX-License-Identifier: Apache-2.0

//! MongoDB adapter
//!
//! Document backend. Multi-document transactions only exist on replica
//! sets and mongos, so transaction support is probed once at connect via
//! `hello` and surfaced through the capability flag; on standalone
//! servers `begin` succeeds as an observable no-op.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Client, ClientSession};
use std::time::Instant;
use tokio::sync::Mutex;

use crate::adapter::{AdapterCapabilities, CreateManyOutcome, CreateManyPolicy, DataAdapter};
use crate::config::EngineKind;
use crate::error::{UdomError, UdomResult};
use crate::transaction::TxCapability;
use crate::types::{
    ColumnInfo, OrderBy, Predicate, QueryResult, Record, RecordId, Row as QRow, SortDirection,
    Value,
};

pub struct MongoAdapter {
    client: Client,
    db_name: String,
    supports_transactions: bool,
    transaction_session: Mutex<Option<ClientSession>>,
}

impl MongoAdapter {
    pub async fn connect(client: Client, db_name: String) -> Self {
        let supports_transactions = Self::detect_transaction_support(&client).await;
        Self {
            client,
            db_name,
            supports_transactions,
            transaction_session: Mutex::new(None),
        }
    }

    fn collection(&self, entity: &str) -> mongodb::Collection<Document> {
        self.client.database(&self.db_name).collection(entity)
    }

    fn hello_supports_transactions(hello: &Document) -> bool {
        let has_set_name = matches!(hello.get("setName"), Some(Bson::String(_)));
        let is_mongos = matches!(hello.get("msg"), Some(Bson::String(msg)) if msg == "isdbgrid");
        let has_sessions = match hello.get("logicalSessionTimeoutMinutes") {
            Some(Bson::Null) | None => false,
            _ => true,
        };
        (has_set_name || is_mongos) && has_sessions
    }

    async fn detect_transaction_support(client: &Client) -> bool {
        let admin = client.database("admin");
        let hello = match admin.run_command(doc! { "hello": 1 }).await {
            Ok(doc) => doc,
            Err(_) => match admin.run_command(doc! { "isMaster": 1 }).await {
                Ok(doc) => doc,
                Err(err) => {
                    tracing::warn!("Failed to detect MongoDB transaction support: {}", err);
                    return false;
                }
            },
        };
        Self::hello_supports_transactions(&hello)
    }

    fn value_to_bson(value: &Value) -> Bson {
        match value {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::Text(s) => {
                // Hex strings that parse as ObjectIds compare against _id.
                if let Ok(oid) = mongodb::bson::oid::ObjectId::parse_str(s) {
                    Bson::ObjectId(oid)
                } else {
                    Bson::String(s.clone())
                }
            }
            Value::Json(j) => mongodb::bson::to_bson(j).unwrap_or(Bson::Null),
        }
    }

    fn bson_to_value(bson: &Bson) -> Value {
        match bson {
            Bson::Null => Value::Null,
            Bson::Boolean(b) => Value::Bool(*b),
            Bson::Int32(i) => Value::Int(*i as i64),
            Bson::Int64(i) => Value::Int(*i),
            Bson::Double(f) => Value::Float(*f),
            Bson::String(s) => Value::Text(s.clone()),
            Bson::ObjectId(oid) => Value::Text(oid.to_hex()),
            Bson::DateTime(dt) => Value::Text(dt.try_to_rfc3339_string().unwrap_or_default()),
            other => Value::Json(other.clone().into_relaxed_extjson()),
        }
    }

    fn record_to_document(record: &Record) -> Document {
        let mut doc = Document::new();
        for (key, value) in record.iter() {
            doc.insert(key.clone(), Self::value_to_bson(value));
        }
        doc
    }

    fn document_to_record(doc: &Document) -> Record {
        doc.iter()
            .map(|(k, v)| (k.clone(), Self::bson_to_value(v)))
            .collect()
    }

    /// AND-conjunction as a filter document. Conditions on the same field
    /// merge into one operator sub-document.
    fn predicate_to_document(predicate: &Predicate) -> Document {
        let mut fields: Vec<(String, Document)> = Vec::new();
        for cond in &predicate.conditions {
            let op = cond.op.mongo().unwrap_or("$eq");
            let bson = Self::value_to_bson(&cond.value);
            match fields.iter_mut().find(|(f, _)| *f == cond.field) {
                Some((_, sub)) => {
                    sub.insert(op, bson);
                }
                None => {
                    let mut sub = Document::new();
                    sub.insert(op, bson);
                    fields.push((cond.field.clone(), sub));
                }
            }
        }

        let mut filter = Document::new();
        for (field, sub) in fields {
            filter.insert(field, sub);
        }
        filter
    }

    fn inserted_id(result: &Bson) -> Option<RecordId> {
        match result {
            Bson::ObjectId(oid) => Some(RecordId::Text(oid.to_hex())),
            Bson::Int32(i) => Some(RecordId::Int(*i as i64)),
            Bson::Int64(i) => Some(RecordId::Int(*i)),
            Bson::String(s) => Some(RecordId::Text(s.clone())),
            _ => None,
        }
    }

    fn sort_document(order_by: &OrderBy) -> Document {
        let direction = match order_by.direction {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        };
        let mut sort = Document::new();
        sort.insert(order_by.field.clone(), direction);
        sort
    }
}

#[async_trait]
impl DataAdapter for MongoAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::MongoDb
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            transactions: self.supports_transactions,
            create_many: CreateManyPolicy::BestEffort,
        }
    }

    async fn create(&self, entity: &str, record: &Record) -> UdomResult<Option<RecordId>> {
        let document = Self::record_to_document(record);
        let collection = self.collection(entity);

        let mut session_guard = self.transaction_session.lock().await;
        let result = if let Some(ref mut session) = *session_guard {
            collection.insert_one(document).session(session).await
        } else {
            collection.insert_one(document).await
        }
        .map_err(|e| UdomError::from_mongo(entity, e))?;

        Ok(Self::inserted_id(&result.inserted_id))
    }

    async fn create_many(&self, entity: &str, records: &[Record]) -> UdomResult<CreateManyOutcome> {
        // Documents insert independently; the first failure stops the
        // batch and the error reports how many landed before it.
        let mut ids = Vec::with_capacity(records.len());
        for (landed, record) in records.iter().enumerate() {
            match self.create(entity, record).await {
                Ok(id) => ids.push(id),
                Err(err) => {
                    return Err(UdomError::execution(format!(
                        "Bulk create stopped after {} of {} records: {}",
                        landed,
                        records.len(),
                        err
                    )));
                }
            }
        }
        Ok(CreateManyOutcome { ids })
    }

    async fn find(
        &self,
        entity: &str,
        predicate: &Predicate,
        order_by: Option<&OrderBy>,
        limit: Option<u64>,
    ) -> UdomResult<Vec<Record>> {
        let filter = Self::predicate_to_document(predicate);
        let collection = self.collection(entity);

        let mut action = collection.find(filter);
        if let Some(order) = order_by {
            action = action.sort(Self::sort_document(order));
        }
        if let Some(n) = limit {
            action = action.limit(n as i64);
        }

        let mut session_guard = self.transaction_session.lock().await;
        if let Some(ref mut session) = *session_guard {
            let mut cursor = action
                .session(&mut *session)
                .await
                .map_err(|e| UdomError::from_mongo(entity, e))?;
            let mut records = Vec::new();
            while let Some(item) = cursor.next(&mut *session).await {
                let doc = item.map_err(|e| UdomError::from_mongo(entity, e))?;
                records.push(Self::document_to_record(&doc));
            }
            Ok(records)
        } else {
            drop(session_guard);
            let cursor = action.await.map_err(|e| UdomError::from_mongo(entity, e))?;
            let docs: Vec<Document> = cursor
                .try_collect()
                .await
                .map_err(|e| UdomError::from_mongo(entity, e))?;
            Ok(docs.iter().map(Self::document_to_record).collect())
        }
    }

    async fn update(
        &self,
        entity: &str,
        changes: &Record,
        predicate: &Predicate,
    ) -> UdomResult<u64> {
        if changes.is_empty() {
            return Err(UdomError::validation("Cannot apply an empty update"));
        }
        let filter = Self::predicate_to_document(predicate);
        let update = doc! { "$set": Self::record_to_document(changes) };
        let collection = self.collection(entity);

        let mut session_guard = self.transaction_session.lock().await;
        let result = if let Some(ref mut session) = *session_guard {
            collection.update_many(filter, update).session(session).await
        } else {
            collection.update_many(filter, update).await
        }
        .map_err(|e| UdomError::from_mongo(entity, e))?;

        Ok(result.matched_count)
    }

    async fn delete(&self, entity: &str, predicate: &Predicate) -> UdomResult<u64> {
        let filter = Self::predicate_to_document(predicate);
        let collection = self.collection(entity);

        let mut session_guard = self.transaction_session.lock().await;
        let result = if let Some(ref mut session) = *session_guard {
            collection.delete_many(filter).session(session).await
        } else {
            collection.delete_many(filter).await
        }
        .map_err(|e| UdomError::from_mongo(entity, e))?;

        Ok(result.deleted_count)
    }

    /// Runs a native database command. The command string is a JSON
    /// document in MongoDB command shape, e.g.
    /// `{"find": "users", "filter": {"age": {"$gt": 21}}}` or
    /// `{"ping": 1}`; the raw reply document comes back as one JSON row.
    /// While a transaction is open the command runs on its session.
    async fn execute(&self, command: &str) -> UdomResult<QueryResult> {
        let start = Instant::now();

        let json: serde_json::Value = serde_json::from_str(command.trim())
            .map_err(|e| UdomError::validation(format!("Invalid command JSON: {}", e)))?;
        let doc = mongodb::bson::to_document(&json)
            .map_err(|e| UdomError::validation(format!("Invalid command document: {}", e)))?;

        let database = self.client.database(&self.db_name);
        let mut session_guard = self.transaction_session.lock().await;
        let reply = if let Some(ref mut session) = *session_guard {
            database.run_command(doc).session(session).await
        } else {
            database.run_command(doc).await
        }
        .map_err(|e| UdomError::from_mongo("", e))?;

        let json_reply = serde_json::to_value(&reply).unwrap_or(serde_json::Value::Null);
        Ok(QueryResult {
            columns: vec![ColumnInfo {
                name: "document".to_string(),
                data_type: "json".to_string(),
                nullable: true,
            }],
            rows: vec![QRow {
                values: vec![Value::Json(json_reply)],
            }],
            affected_rows: None,
            execution_time_ms: start.elapsed().as_micros() as f64 / 1000.0,
        })
    }

    async fn begin(&self) -> UdomResult<TxCapability> {
        let mut tx = self.transaction_session.lock().await;
        if tx.is_some() {
            return Err(UdomError::transaction_state(
                "A transaction is already active on this session",
            ));
        }

        if !self.supports_transactions {
            // Standalone server: the unit of work proceeds without
            // atomicity and the caller can observe that.
            return Ok(TxCapability::NonTransactional);
        }

        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| UdomError::from_mongo("", e))?;
        session
            .start_transaction()
            .await
            .map_err(|e| UdomError::from_mongo("", e))?;

        *tx = Some(session);
        Ok(TxCapability::Transactional)
    }

    async fn commit(&self) -> UdomResult<()> {
        let mut tx = self.transaction_session.lock().await;
        match tx.take() {
            Some(mut session) => session
                .commit_transaction()
                .await
                .map_err(|e| UdomError::from_mongo("", e)),
            None if !self.supports_transactions => Ok(()),
            None => Err(UdomError::transaction_state(
                "No active transaction to commit",
            )),
        }
    }

    async fn rollback(&self) -> UdomResult<()> {
        let mut tx = self.transaction_session.lock().await;
        match tx.take() {
            Some(mut session) => session
                .abort_transaction()
                .await
                .map_err(|e| UdomError::from_mongo("", e)),
            None if !self.supports_transactions => Ok(()),
            None => Err(UdomError::transaction_state(
                "No active transaction to rollback",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Compare;

    #[test]
    fn predicate_translates_to_operator_documents() {
        let pred = Predicate::new()
            .eq("name", "ada")
            .and("age", Compare::Gt, 21i64)
            .and("age", Compare::Lte, 60i64);
        let filter = MongoAdapter::predicate_to_document(&pred);

        assert_eq!(
            filter.get_document("name").unwrap(),
            &doc! { "$eq": "ada" }
        );
        assert_eq!(
            filter.get_document("age").unwrap(),
            &doc! { "$gt": 21i64, "$lte": 60i64 }
        );
    }

    #[test]
    fn match_all_predicate_is_an_empty_filter() {
        let filter = MongoAdapter::predicate_to_document(&Predicate::match_all());
        assert!(filter.is_empty());
    }

    #[test]
    fn datetimes_read_back_as_rfc3339_text() {
        let epoch = mongodb::bson::DateTime::from_millis(0);
        match MongoAdapter::bson_to_value(&Bson::DateTime(epoch)) {
            Value::Text(text) => assert!(text.starts_with("1970-01-01T00:00:00")),
            other => panic!("expected Text, got {:?}", other),
        }
    }

    #[test]
    fn object_id_strings_round_trip() {
        let oid = mongodb::bson::oid::ObjectId::new();
        let bson = MongoAdapter::value_to_bson(&Value::Text(oid.to_hex()));
        assert_eq!(bson, Bson::ObjectId(oid));
        assert_eq!(
            MongoAdapter::bson_to_value(&bson),
            Value::Text(oid.to_hex())
        );
    }

    #[test]
    fn hello_reply_gates_transaction_support() {
        let replica = doc! {
            "setName": "rs0",
            "logicalSessionTimeoutMinutes": 30,
        };
        assert!(MongoAdapter::hello_supports_transactions(&replica));

        let standalone = doc! { "ok": 1 };
        assert!(!MongoAdapter::hello_supports_transactions(&standalone));
    }
}
