/*!
# zcolmap-sqlite

SQLite adapters for the `zcolmap-core` driver seam.

- [`SqliteConnection`] implements [`Connection`](zcolmap_core::Connection).
  The first statement prepared after a commit or rollback opens a transaction
  (`BEGIN`), so `commit`/`rollback` always act on the work of the current
  cycle.
- [`SqlitePool`] implements [`ConnectionPool`](zcolmap_core::ConnectionPool)
  for processors that own their transaction. Connections go back to the pool
  when the handle is dropped; any transaction still open at that point is
  rolled back first.

Timestamps bind as `YYYY-MM-DD HH:MM:SS[.fff]` text and the query timeout maps
to SQLite's busy timeout.
*/

mod connection;
mod pool;

pub use connection::{SqliteConnection, TIMESTAMP_FORMAT};
pub use pool::SqlitePool;

use zcolmap_core::ColmapError;

/// Wrap a rusqlite failure as a database error for `operation`
pub(crate) fn db_error(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> ColmapError {
    move |err| ColmapError::database(operation, err)
}
