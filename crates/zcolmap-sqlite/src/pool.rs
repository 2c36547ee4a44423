use crate::connection::SqliteConnection;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use zcolmap_core::{ColmapError, Connection, ConnectionPool, PreparedStatement, Result};

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    /// A single shared in-memory database; never reopened
    Memory,
}

type Idle = Arc<Mutex<Vec<SqliteConnection>>>;

/// Hands out [`SqliteConnection`]s and takes them back when their handle drops
#[derive(Debug, Clone)]
pub struct SqlitePool {
    target: Target,
    idle: Idle,
}

impl SqlitePool {
    /// Pool over a database file; connections are opened on demand
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let first = SqliteConnection::open(&path)?;
        Ok(Self {
            target: Target::File(path),
            idle: Arc::new(Mutex::new(vec![first])),
        })
    }

    /// Pool over one in-memory database; at most one connection is out at a time
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            target: Target::Memory,
            idle: Arc::new(Mutex::new(vec![SqliteConnection::open_in_memory()?])),
        })
    }

    /// Run a setup script on a pooled connection
    pub fn execute_script(&self, sql: &str) -> Result<()> {
        let mut conn = self.checkout()?;
        conn.execute_script(sql)?;
        self.idle.lock().push(conn);
        Ok(())
    }

    /// Run `f` against a raw connection, e.g. to inspect results in tests
    pub fn with_connection<T>(&self, f: impl FnOnce(&rusqlite::Connection) -> T) -> Result<T> {
        let conn = self.checkout()?;
        let out = f(conn.inner());
        self.idle.lock().push(conn);
        Ok(out)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn checkout(&self) -> Result<SqliteConnection> {
        if let Some(conn) = self.idle.lock().pop() {
            return Ok(conn);
        }
        match &self.target {
            Target::File(path) => SqliteConnection::open(path),
            Target::Memory => Err(ColmapError::configuration(
                "in-memory SQLite pool has no idle connection",
            )),
        }
    }
}

impl ConnectionPool for SqlitePool {
    fn acquire(&self) -> Result<Box<dyn Connection + Send>> {
        let conn = self.checkout()?;
        debug!("Acquired SQLite connection ({} idle)", self.idle_count());
        Ok(Box::new(PooledConnection {
            conn: Some(conn),
            idle: Arc::clone(&self.idle),
        }))
    }

    fn release(&self, connection: Box<dyn Connection + Send>) -> Result<()> {
        drop(connection);
        debug!("Released SQLite connection ({} idle)", self.idle_count());
        Ok(())
    }
}

struct PooledConnection {
    conn: Option<SqliteConnection>,
    idle: Idle,
}

impl PooledConnection {
    fn get(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| ColmapError::configuration("pooled connection already returned"))
    }
}

impl Connection for PooledConnection {
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn PreparedStatement + 'c>> {
        self.get()?.prepare(sql)
    }

    fn commit(&mut self) -> Result<()> {
        self.get()?.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.get()?.rollback()
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.get()?.set_query_timeout(timeout)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if conn.in_transaction() {
            warn!("Pooled connection returned with an open transaction; rolling back");
            if let Err(e) = conn.rollback() {
                warn!("Discarding connection after failed rollback: {}", e);
                return;
            }
        }
        self.idle.lock().push(conn);
    }
}
