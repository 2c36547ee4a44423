use crate::db_error;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{OpenFlags, Statement, ToSql};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};
use zcolmap_core::{ColumnValue, Connection, PreparedStatement, Result, Row, SqlParam};

/// `chrono` format used for bound timestamps; fractional seconds only when non-zero
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A rusqlite connection held in a lazily `BEGIN`ed state
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = rusqlite::Connection::open_with_flags(path.as_ref(), flags)
            .map_err(db_error("open"))?;
        debug!("Opened SQLite database {}", path.as_ref().display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_error("open"))?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(db_error("configure"))?;
        Ok(Self { conn })
    }

    /// Run a script outside any cycle, e.g. schema setup; commits pending work first
    pub fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.finish("COMMIT")?;
        self.conn.execute_batch(sql).map_err(db_error("script"))
    }

    pub fn inner(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.in_transaction() {
            trace!("BEGIN");
            self.conn.execute_batch("BEGIN").map_err(db_error("begin"))?;
        }
        Ok(())
    }

    fn finish(&mut self, verb: &'static str) -> Result<()> {
        if self.in_transaction() {
            trace!("{}", verb);
            self.conn.execute_batch(verb).map_err(db_error("transaction end"))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.conn.path())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn PreparedStatement + 'c>> {
        self.begin_if_needed()?;
        let stmt = self.conn.prepare(sql).map_err(db_error("prepare"))?;
        trace!("Prepared [{}] with {} parameters", sql, stmt.parameter_count());
        Ok(Box::new(SqliteStatement {
            stmt,
            current: BTreeMap::new(),
            batch: Vec::new(),
        }))
    }

    fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout).map_err(db_error("busy timeout"))
    }
}

struct SqliteStatement<'c> {
    stmt: Statement<'c>,
    current: BTreeMap<usize, SqlParam>,
    batch: Vec<BTreeMap<usize, SqlParam>>,
}

impl SqliteStatement<'_> {
    fn apply(stmt: &mut Statement<'_>, bindings: &BTreeMap<usize, SqlParam>) -> Result<()> {
        for (slot, param) in bindings {
            stmt.raw_bind_parameter(*slot, SqliteParam(param))
                .map_err(db_error("bind"))?;
        }
        Ok(())
    }
}

impl PreparedStatement for SqliteStatement<'_> {
    fn bind(&mut self, slot: usize, param: SqlParam) -> Result<()> {
        self.current.insert(slot, param);
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        self.batch.push(self.current.clone());
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        Self::apply(&mut self.stmt, &self.current)?;
        let rows = self.stmt.raw_execute().map_err(db_error("execute"))?;
        Ok(rows as u64)
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>> {
        let entries = std::mem::take(&mut self.batch);
        let mut counts = Vec::with_capacity(entries.len());
        for entry in &entries {
            Self::apply(&mut self.stmt, entry)?;
            let rows = self.stmt.raw_execute().map_err(db_error("batch execute"))?;
            counts.push(rows as u64);
        }
        Ok(counts)
    }

    fn query(&mut self) -> Result<Vec<Row>> {
        Self::apply(&mut self.stmt, &self.current)?;
        let names: Vec<String> = self
            .stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut out = Vec::new();
        let mut rows = self.stmt.raw_query();
        while let Some(row) = rows.next().map_err(db_error("query"))? {
            let mut record = Row::with_capacity(names.len());
            for (ix, name) in names.iter().enumerate() {
                let cell = row.get_ref(ix).map_err(db_error("read column"))?;
                record.insert(name.clone(), column_value(cell));
            }
            out.push(record);
        }
        Ok(out)
    }
}

fn column_value(cell: ValueRef<'_>) -> Option<ColumnValue> {
    match cell {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(ColumnValue::Integer(i)),
        ValueRef::Real(r) => Some(ColumnValue::Real(r)),
        ValueRef::Text(bytes) => Some(ColumnValue::Text(String::from_utf8_lossy(bytes).into_owned())),
        ValueRef::Blob(bytes) => Some(ColumnValue::Bytes(bytes.to_vec())),
    }
}

struct SqliteParam<'p>(&'p SqlParam);

impl ToSql for SqliteParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            SqlParam::Null => ToSqlOutput::Owned(Value::Null),
            SqlParam::Text(s) | SqlParam::Clob(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlParam::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlParam::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            SqlParam::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            SqlParam::Timestamp(ts) => {
                ToSqlOutput::Owned(Value::Text(ts.format(TIMESTAMP_FORMAT).to_string()))
            }
            SqlParam::Blob(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
        })
    }
}
