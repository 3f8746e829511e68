//! # udom
//!
//! A universal data object model over heterogeneous storage engines.
//! One record/predicate vocabulary and one session API cover SQLite,
//! MySQL, PostgreSQL, SQL Server and MongoDB; per-engine adapters absorb
//! dialect and driver differences behind the [`DataAdapter`] contract.
//!
//! ```no_run
//! use udom::{Predicate, Record, Udom};
//!
//! # async fn demo() -> udom::UdomResult<()> {
//! let db = Udom::connect("sql", "sqlite", "sqlite:///app.db").await?;
//!
//! db.create("users", &Record::new().with_field("name", "Ada")).await?;
//! let adults = db.uquery("FIND users WHERE age >= 18").await?;
//! let _ = adults;
//!
//! db.transaction(|tx| async move {
//!     tx.delete("users", &Predicate::new().eq("name", "Ada")).await?;
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod manager;
mod observe;
pub mod transaction;
pub mod types;
pub mod udom;
pub mod uql;

pub use adapter::{AdapterCapabilities, CreateManyOutcome, CreateManyPolicy, DataAdapter};
pub use config::{EngineFamily, EngineKind, TargetConfig, TargetKey};
pub use error::{UdomError, UdomResult};
pub use manager::ConnectionManager;
pub use transaction::{TxCapability, TxState};
pub use types::{
    ColumnInfo, Compare, Condition, OrderBy, Predicate, QueryResult, Record, RecordId, Row,
    SortDirection, Value,
};
pub use udom::{Udom, UqlOutcome};
pub use uql::UqlCommand;
