/*!
In-memory connection that records what the engine does.

[`RecordingConnection`] and [`RecordingPool`] implement the driver traits
without a database. Everything they see lands in a shared [`Journal`]:
prepared SQL, bound slots per execution, batch entries, commits, rollbacks,
releases and timeouts. Query results and driver failures can be scripted.
It backs dry runs in the CLI and most of the engine's tests.
*/

use crate::connection::{Connection, ConnectionPool, PreparedStatement, Row};
use crate::error::{ColmapError, Result};
use crate::value::SqlParam;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How a recorded statement was run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Update,
    Batch,
    Query,
}

/// One statement execution with the parameters bound at that moment
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub mode: ExecutionMode,
    /// One entry per execution; batches carry one entry per batch member
    pub bindings: Vec<Vec<(usize, SqlParam)>>,
}

impl ExecutedStatement {
    /// Parameters of the first (or only) entry, in slot order
    pub fn params(&self) -> Vec<SqlParam> {
        self.bindings
            .first()
            .map(|b| b.iter().map(|(_, p)| p.clone()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
struct JournalState {
    prepared: Vec<String>,
    executed: Vec<ExecutedStatement>,
    commits: usize,
    rollbacks: usize,
    releases: usize,
    timeouts: Vec<Duration>,
    query_results: VecDeque<Vec<Row>>,
    failures: Vec<(String, String)>,
    fail_next_commit: Option<String>,
}

/// Shared, cloneable record of connection activity
#[derive(Debug, Clone, Default)]
pub struct Journal {
    state: Arc<Mutex<JournalState>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by the next `query()`; unscripted queries return no rows
    pub fn push_query_result(&self, rows: Vec<Row>) {
        self.state.lock().query_results.push_back(rows);
    }

    /// Fail every execution whose SQL contains `fragment`
    pub fn fail_when(&self, fragment: impl Into<String>, message: impl Into<String>) {
        self.state
            .lock()
            .failures
            .push((fragment.into(), message.into()));
    }

    pub fn fail_next_commit(&self, message: impl Into<String>) {
        self.state.lock().fail_next_commit = Some(message.into());
    }

    pub fn prepared(&self) -> Vec<String> {
        self.state.lock().prepared.clone()
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.state.lock().executed.clone()
    }

    pub fn last_executed(&self) -> Option<ExecutedStatement> {
        self.state.lock().executed.last().cloned()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    pub fn releases(&self) -> usize {
        self.state.lock().releases
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.lock().timeouts.clone()
    }

    fn check_failure(&self, sql: &str) -> Result<()> {
        let state = self.state.lock();
        match state.failures.iter().find(|(fragment, _)| sql.contains(fragment.as_str())) {
            Some((_, message)) => Err(ColmapError::database("execute", message.clone())),
            None => Ok(()),
        }
    }

    fn record(&self, sql: &str, mode: ExecutionMode, bindings: Vec<Vec<(usize, SqlParam)>>) {
        trace!("Recorded {:?} of [{}] with {} entries", mode, sql, bindings.len());
        self.state.lock().executed.push(ExecutedStatement {
            sql: sql.to_string(),
            mode,
            bindings,
        });
    }
}

/// A [`Connection`] that only records
#[derive(Debug, Clone, Default)]
pub struct RecordingConnection {
    journal: Journal,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl Connection for RecordingConnection {
    fn prepare<'c>(&'c mut self, sql: &str) -> Result<Box<dyn PreparedStatement + 'c>> {
        self.journal.state.lock().prepared.push(sql.to_string());
        Ok(Box::new(RecordingStatement {
            journal: &self.journal,
            sql: sql.to_string(),
            current: BTreeMap::new(),
            batch: Vec::new(),
        }))
    }

    fn commit(&mut self) -> Result<()> {
        let mut state = self.journal.state.lock();
        if let Some(message) = state.fail_next_commit.take() {
            return Err(ColmapError::database("commit", message));
        }
        state.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.journal.state.lock().rollbacks += 1;
        Ok(())
    }

    fn set_query_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.journal.state.lock().timeouts.push(timeout);
        Ok(())
    }
}

struct RecordingStatement<'c> {
    journal: &'c Journal,
    sql: String,
    current: BTreeMap<usize, SqlParam>,
    batch: Vec<Vec<(usize, SqlParam)>>,
}

impl RecordingStatement<'_> {
    fn snapshot(&self) -> Vec<(usize, SqlParam)> {
        self.current.iter().map(|(slot, p)| (*slot, p.clone())).collect()
    }
}

impl PreparedStatement for RecordingStatement<'_> {
    fn bind(&mut self, slot: usize, param: SqlParam) -> Result<()> {
        if slot == 0 {
            return Err(ColmapError::plan_mismatch("placeholder slots start at 1"));
        }
        self.current.insert(slot, param);
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        let entry = self.snapshot();
        self.batch.push(entry);
        Ok(())
    }

    fn execute_update(&mut self) -> Result<u64> {
        self.journal.check_failure(&self.sql)?;
        self.journal
            .record(&self.sql, ExecutionMode::Update, vec![self.snapshot()]);
        Ok(1)
    }

    fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.journal.check_failure(&self.sql)?;
        let entries = std::mem::take(&mut self.batch);
        let counts = vec![1; entries.len()];
        self.journal.record(&self.sql, ExecutionMode::Batch, entries);
        Ok(counts)
    }

    fn query(&mut self) -> Result<Vec<Row>> {
        self.journal.check_failure(&self.sql)?;
        self.journal
            .record(&self.sql, ExecutionMode::Query, vec![self.snapshot()]);
        Ok(self
            .journal
            .state
            .lock()
            .query_results
            .pop_front()
            .unwrap_or_default())
    }
}

/// A [`ConnectionPool`] whose connections all share one journal
#[derive(Debug, Clone, Default)]
pub struct RecordingPool {
    journal: Journal,
}

impl RecordingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl ConnectionPool for RecordingPool {
    fn acquire(&self) -> Result<Box<dyn Connection + Send>> {
        Ok(Box::new(RecordingConnection::with_journal(self.journal.clone())))
    }

    fn release(&self, _connection: Box<dyn Connection + Send>) -> Result<()> {
        self.journal.state.lock().releases += 1;
        Ok(())
    }
}
