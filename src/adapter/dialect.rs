// SPDX-License-Identifier: Apache-2.0

//! SQL statement generation for the relational adapters
//!
//! One generator per dialect. The sqlx-backed dialects render bind
//! placeholders and hand the parameter values back alongside the SQL;
//! SQL Server renders inline literals because its driver path executes
//! through `simple_query`.

use crate::error::{UdomError, UdomResult};
use crate::types::{Compare, OrderBy, Predicate, Record, SortDirection, Value};

/// Supported SQL dialects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    MySql,
    Postgres,
    Mssql,
}

/// A rendered statement plus its bind parameters, in placeholder order.
///
/// `params` is always empty for the SQL Server dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlDialect {
    /// Quotes an identifier with the dialect's quoting style.
    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            SqlDialect::Sqlite | SqlDialect::Postgres => format!("\"{}\"", ident),
            SqlDialect::MySql => format!("`{}`", ident),
            SqlDialect::Mssql => format!("[{}]", ident),
        }
    }

    fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Sqlite | SqlDialect::MySql => "?".to_string(),
            SqlDialect::Postgres => format!("${}", index),
            // SQL Server renders literals inline; never called.
            SqlDialect::Mssql => "?".to_string(),
        }
    }

    fn inline(&self) -> bool {
        matches!(self, SqlDialect::Mssql)
    }

    /// Entity and field names go into SQL text as quoted identifiers, so
    /// they are restricted to a conservative character set up front.
    pub fn validate_identifier(&self, ident: &str) -> UdomResult<()> {
        if ident.is_empty() || ident.len() > 128 {
            return Err(UdomError::validation(format!(
                "Invalid identifier: '{}'",
                ident
            )));
        }
        let mut chars = ident.chars();
        let first = chars.next().unwrap();
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(UdomError::validation(format!(
                "Identifier must start with a letter or underscore: '{}'",
                ident
            )));
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(UdomError::validation(format!(
                "Identifier contains invalid characters: '{}'",
                ident
            )));
        }
        Ok(())
    }

    /// Renders a value as an inline SQL literal.
    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match self {
                SqlDialect::Postgres => if *b { "TRUE" } else { "FALSE" }.to_string(),
                _ => if *b { "1" } else { "0" }.to_string(),
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => self.string_literal(s),
            Value::Json(j) => self.string_literal(&j.to_string()),
        }
    }

    fn string_literal(&self, s: &str) -> String {
        let escaped = s.replace('\'', "''");
        match self {
            SqlDialect::Mssql => format!("N'{}'", escaped),
            _ => format!("'{}'", escaped),
        }
    }

    /// Column type for auto-provisioned tables, chosen from a sample value.
    fn column_type(&self, value: &Value) -> &'static str {
        match (self, value) {
            (SqlDialect::Sqlite, Value::Bool(_) | Value::Int(_)) => "INTEGER",
            (SqlDialect::Sqlite, Value::Float(_)) => "REAL",
            (SqlDialect::Sqlite, _) => "TEXT",

            (SqlDialect::MySql, Value::Bool(_)) => "TINYINT(1)",
            (SqlDialect::MySql, Value::Int(_)) => "BIGINT",
            (SqlDialect::MySql, Value::Float(_)) => "DOUBLE",
            (SqlDialect::MySql, Value::Json(_)) => "TEXT",
            (SqlDialect::MySql, _) => "VARCHAR(255)",

            (SqlDialect::Postgres, Value::Bool(_)) => "BOOLEAN",
            (SqlDialect::Postgres, Value::Int(_)) => "BIGINT",
            (SqlDialect::Postgres, Value::Float(_)) => "DOUBLE PRECISION",
            (SqlDialect::Postgres, _) => "TEXT",

            (SqlDialect::Mssql, Value::Bool(_)) => "BIT",
            (SqlDialect::Mssql, Value::Int(_)) => "BIGINT",
            (SqlDialect::Mssql, Value::Float(_)) => "FLOAT",
            (SqlDialect::Mssql, Value::Json(_)) => "NVARCHAR(MAX)",
            (SqlDialect::Mssql, _) => "NVARCHAR(255)",
        }
    }

    /// `WHERE ...` clause for a predicate. The empty conjunction renders no
    /// clause at all; callers that must guard mutations pass `force_clause`
    /// to get an explicit `WHERE 1=1`.
    fn where_clause(
        &self,
        predicate: &Predicate,
        params: &mut Vec<Value>,
        force_clause: bool,
    ) -> UdomResult<String> {
        if predicate.is_empty() {
            return Ok(if force_clause {
                " WHERE 1=1".to_string()
            } else {
                String::new()
            });
        }

        let mut parts = Vec::with_capacity(predicate.conditions.len());
        for cond in &predicate.conditions {
            self.validate_identifier(&cond.field)?;
            let column = self.quote_ident(&cond.field);

            // NULL never compares equal through `=`; use IS [NOT] NULL.
            if cond.value.is_null() {
                match cond.op {
                    Compare::Eq => parts.push(format!("{} IS NULL", column)),
                    Compare::Neq => parts.push(format!("{} IS NOT NULL", column)),
                    _ => {
                        return Err(UdomError::validation(format!(
                            "Cannot order-compare '{}' against NULL",
                            cond.field
                        )))
                    }
                }
                continue;
            }

            if self.inline() {
                parts.push(format!(
                    "{} {} {}",
                    column,
                    cond.op.sql(),
                    self.format_value(&cond.value)
                ));
            } else {
                params.push(cond.value.clone());
                parts.push(format!(
                    "{} {} {}",
                    column,
                    cond.op.sql(),
                    self.placeholder(params.len())
                ));
            }
        }

        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }

    /// `SELECT * FROM entity [WHERE ...] [ORDER BY ...] [LIMIT n]`
    pub fn render_select(
        &self,
        entity: &str,
        predicate: &Predicate,
        order_by: Option<&OrderBy>,
        limit: Option<u64>,
    ) -> UdomResult<Statement> {
        self.validate_identifier(entity)?;
        let mut params = Vec::new();

        let projection = match (self, limit) {
            // TOP replaces LIMIT on SQL Server.
            (SqlDialect::Mssql, Some(n)) => format!("TOP {} *", n),
            _ => "*".to_string(),
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            projection,
            self.quote_ident(entity)
        );
        sql.push_str(&self.where_clause(predicate, &mut params, false)?);

        if let Some(order) = order_by {
            self.validate_identifier(&order.field)?;
            let dir = match order.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY {} {}",
                self.quote_ident(&order.field),
                dir
            ));
        }

        if let Some(n) = limit {
            if *self != SqlDialect::Mssql {
                sql.push_str(&format!(" LIMIT {}", n));
            }
        }

        Ok(Statement { sql, params })
    }

    /// `INSERT INTO entity (...) VALUES (...)`; Postgres appends
    /// `RETURNING id` so the assigned identifier comes back with the row.
    pub fn render_insert(&self, entity: &str, record: &Record) -> UdomResult<Statement> {
        self.validate_identifier(entity)?;
        if record.is_empty() {
            return Err(UdomError::validation("Cannot insert an empty record"));
        }

        let mut columns = Vec::with_capacity(record.len());
        let mut placeholders = Vec::with_capacity(record.len());
        let mut params = Vec::new();

        for (field, value) in record.iter() {
            self.validate_identifier(field)?;
            columns.push(self.quote_ident(field));
            if self.inline() {
                placeholders.push(self.format_value(value));
            } else {
                params.push(value.clone());
                placeholders.push(self.placeholder(params.len()));
            }
        }

        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_ident(entity),
            columns.join(", "),
            placeholders.join(", ")
        );
        if *self == SqlDialect::Postgres {
            sql.push_str(" RETURNING \"id\"");
        }

        Ok(Statement { sql, params })
    }

    /// `UPDATE entity SET ... [WHERE ...]`; match-all updates get an
    /// explicit `WHERE 1=1`.
    pub fn render_update(
        &self,
        entity: &str,
        changes: &Record,
        predicate: &Predicate,
    ) -> UdomResult<Statement> {
        self.validate_identifier(entity)?;
        if changes.is_empty() {
            return Err(UdomError::validation("Cannot apply an empty update"));
        }

        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(changes.len());
        for (field, value) in changes.iter() {
            self.validate_identifier(field)?;
            let column = self.quote_ident(field);
            if self.inline() {
                assignments.push(format!("{} = {}", column, self.format_value(value)));
            } else {
                params.push(value.clone());
                assignments.push(format!("{} = {}", column, self.placeholder(params.len())));
            }
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            self.quote_ident(entity),
            assignments.join(", ")
        );
        sql.push_str(&self.where_clause(predicate, &mut params, true)?);

        Ok(Statement { sql, params })
    }

    /// `DELETE FROM entity WHERE ...`; the explicit match-all predicate
    /// renders `WHERE 1=1` so a full-entity delete is visibly deliberate.
    pub fn render_delete(&self, entity: &str, predicate: &Predicate) -> UdomResult<Statement> {
        self.validate_identifier(entity)?;
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.quote_ident(entity));
        sql.push_str(&self.where_clause(predicate, &mut params, true)?);
        Ok(Statement { sql, params })
    }

    /// DDL for auto-provisioning an entity's table from a sample record.
    ///
    /// Always adds an auto-assigned `id` primary key; a payload field named
    /// `id` is skipped here and flows through the insert as a plain column
    /// value instead.
    pub fn render_create_table(&self, entity: &str, sample: &Record) -> UdomResult<String> {
        self.validate_identifier(entity)?;

        let id_column = match self {
            SqlDialect::Sqlite => "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            SqlDialect::MySql => "`id` BIGINT AUTO_INCREMENT PRIMARY KEY".to_string(),
            SqlDialect::Postgres => "\"id\" BIGSERIAL PRIMARY KEY".to_string(),
            SqlDialect::Mssql => "[id] BIGINT IDENTITY(1,1) PRIMARY KEY".to_string(),
        };

        let mut columns = vec![id_column];
        for (field, value) in sample.iter() {
            if field == "id" {
                continue;
            }
            self.validate_identifier(field)?;
            columns.push(format!(
                "{} {}",
                self.quote_ident(field),
                self.column_type(value)
            ));
        }

        let table = self.quote_ident(entity);
        let body = columns.join(", ");
        let sql = match self {
            SqlDialect::Mssql => format!(
                "IF OBJECT_ID(N'{}', N'U') IS NULL CREATE TABLE {} ({})",
                entity, table, body
            ),
            _ => format!("CREATE TABLE IF NOT EXISTS {} ({})", table, body),
        };
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_renders_placeholders_per_dialect() {
        let pred = Predicate::new().eq("name", "ada").and("age", Compare::Gte, 18i64);

        let s = SqlDialect::Sqlite
            .render_select("users", &pred, None, None)
            .unwrap();
        assert_eq!(
            s.sql,
            "SELECT * FROM \"users\" WHERE \"name\" = ? AND \"age\" >= ?"
        );
        assert_eq!(s.params.len(), 2);

        let s = SqlDialect::Postgres
            .render_select("users", &pred, None, None)
            .unwrap();
        assert_eq!(
            s.sql,
            "SELECT * FROM \"users\" WHERE \"name\" = $1 AND \"age\" >= $2"
        );
    }

    #[test]
    fn select_with_order_and_limit() {
        let s = SqlDialect::MySql
            .render_select(
                "users",
                &Predicate::match_all(),
                Some(&OrderBy::desc("age")),
                Some(5),
            )
            .unwrap();
        assert_eq!(s.sql, "SELECT * FROM `users` ORDER BY `age` DESC LIMIT 5");
        assert!(s.params.is_empty());

        let s = SqlDialect::Mssql
            .render_select("users", &Predicate::match_all(), None, Some(5))
            .unwrap();
        assert_eq!(s.sql, "SELECT TOP 5 * FROM [users]");
    }

    #[test]
    fn mssql_renders_inline_literals() {
        let pred = Predicate::new().eq("name", "o'hara");
        let s = SqlDialect::Mssql
            .render_select("users", &pred, None, None)
            .unwrap();
        assert_eq!(s.sql, "SELECT * FROM [users] WHERE [name] = N'o''hara'");
        assert!(s.params.is_empty());
    }

    #[test]
    fn insert_column_order_matches_params() {
        let rec = Record::new().with_field("name", "ada").with_field("age", 36i64);
        let s = SqlDialect::Sqlite.render_insert("users", &rec).unwrap();
        assert_eq!(
            s.sql,
            "INSERT INTO \"users\" (\"age\", \"name\") VALUES (?, ?)"
        );
        assert_eq!(s.params, vec![Value::Int(36), Value::Text("ada".into())]);

        let s = SqlDialect::Postgres.render_insert("users", &rec).unwrap();
        assert!(s.sql.ends_with("RETURNING \"id\""));
    }

    #[test]
    fn update_always_carries_a_where_clause() {
        let changes = Record::new().with_field("age", 37i64);
        let s = SqlDialect::Sqlite
            .render_update("users", &changes, &Predicate::match_all())
            .unwrap();
        assert_eq!(s.sql, "UPDATE \"users\" SET \"age\" = ? WHERE 1=1");

        let s = SqlDialect::Sqlite
            .render_update("users", &changes, &Predicate::new().eq("id", 4i64))
            .unwrap();
        assert_eq!(s.sql, "UPDATE \"users\" SET \"age\" = ? WHERE \"id\" = ?");
    }

    #[test]
    fn delete_match_all_is_explicit() {
        let s = SqlDialect::MySql
            .render_delete("users", &Predicate::match_all())
            .unwrap();
        assert_eq!(s.sql, "DELETE FROM `users` WHERE 1=1");
    }

    #[test]
    fn null_comparisons_use_is_null() {
        let pred = Predicate::new().and("note", Compare::Eq, Value::Null);
        let s = SqlDialect::Sqlite
            .render_select("users", &pred, None, None)
            .unwrap();
        assert_eq!(s.sql, "SELECT * FROM \"users\" WHERE \"note\" IS NULL");

        let pred = Predicate::new().and("note", Compare::Gt, Value::Null);
        assert!(SqlDialect::Sqlite
            .render_select("users", &pred, None, None)
            .is_err());
    }

    #[test]
    fn create_table_per_dialect() {
        let sample = Record::new()
            .with_field("name", "ada")
            .with_field("age", 36i64)
            .with_field("id", 9i64);

        let sql = SqlDialect::Sqlite.render_create_table("users", &sample).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"users\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \"age\" INTEGER, \"name\" TEXT)"
        );

        let sql = SqlDialect::Mssql.render_create_table("users", &sample).unwrap();
        assert!(sql.starts_with("IF OBJECT_ID(N'users', N'U') IS NULL CREATE TABLE [users]"));
        assert!(sql.contains("[id] BIGINT IDENTITY(1,1) PRIMARY KEY"));
    }

    #[test]
    fn rejects_hostile_identifiers() {
        assert!(SqlDialect::Sqlite.validate_identifier("users; DROP TABLE x").is_err());
        assert!(SqlDialect::Sqlite.validate_identifier("1users").is_err());
        assert!(SqlDialect::Sqlite.validate_identifier("").is_err());
        assert!(SqlDialect::Sqlite.validate_identifier("ok_name2").is_ok());
    }
}
