//! Driver seam.
//!
//! The engine talks to a database only through these traits. A driver crate
//! (see `zcolmap-sqlite`) implements them; tests use
//! [`RecordingConnection`](crate::recording::RecordingConnection).

use crate::error::Result;
use crate::value::{ColumnValue, SqlParam};
use indexmap::IndexMap;
use std::time::Duration;

/// One result row, keyed by column label in select-list order
pub type Row = IndexMap<String, Option<ColumnValue>>;

/// A prepared statement with 1-based placeholder slots
pub trait PreparedStatement {
    fn bind(&mut self, slot: usize, param: SqlParam) -> Result<()>;

    /// Snapshot the current bindings as one batch entry
    fn add_batch(&mut self) -> Result<()>;

    fn execute_update(&mut self) -> Result<u64>;

    /// Run every batch entry; any driver failure aborts the whole batch
    fn execute_batch(&mut self) -> Result<Vec<u64>>;

    fn query(&mut self) -> Result<Vec<Row>>;
}

/// A single database session
pub trait Connection {
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn PreparedStatement + 'c>>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Bound the time any single statement may block. Only called when a
    /// timeout is configured; otherwise the session keeps its own setting.
    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()>;
}

/// Hands out connections for processors that own their transaction
pub trait ConnectionPool: Send + Sync {
    fn acquire(&self) -> Result<Box<dyn Connection + Send>>;

    fn release(&self, connection: Box<dyn Connection + Send>) -> Result<()>;
}
