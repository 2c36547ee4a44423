/*!
Connection ownership.

A processor decides once, from its `TRANSACTIONAL_LOGGING` flag, whether it
runs inside the caller's transaction ([`TransactionPolicy::Ambient`]) or
acquires, commits and releases its own connection
([`TransactionPolicy::Owned`]). [`TransactionScope::run`] applies that policy
around one cycle; in owned mode the connection is rolled back and released on
every failure path before the error is returned.
*/

use crate::connection::{Connection, ConnectionPool};
use crate::error::{ColmapError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPolicy {
    /// Commit and rollback belong to the caller
    Ambient,
    /// The engine commits, rolls back and releases itself
    Owned,
}

impl TransactionPolicy {
    pub fn from_transactional_flag(transactional: bool) -> Self {
        if transactional {
            TransactionPolicy::Ambient
        } else {
            TransactionPolicy::Owned
        }
    }
}

impl fmt::Display for TransactionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionPolicy::Ambient => f.write_str("ambient"),
            TransactionPolicy::Owned => f.write_str("owned"),
        }
    }
}

/// Where a cycle's connection comes from
pub enum ConnectionSource<'a> {
    /// The caller's connection, already inside its transaction
    Ambient(&'a mut dyn Connection),
    /// A pool the engine acquires from and releases to
    Pool(&'a dyn ConnectionPool),
}

impl ConnectionSource<'_> {
    fn policy(&self) -> TransactionPolicy {
        match self {
            ConnectionSource::Ambient(_) => TransactionPolicy::Ambient,
            ConnectionSource::Pool(_) => TransactionPolicy::Owned,
        }
    }
}

impl fmt::Debug for ConnectionSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionSource({})", self.policy())
    }
}

/// Applies a [`TransactionPolicy`] and query timeout around one unit of work
#[derive(Debug, Clone, Copy)]
pub struct TransactionScope {
    policy: TransactionPolicy,
    query_timeout: Option<Duration>,
}

impl TransactionScope {
    pub fn new(policy: TransactionPolicy) -> Self {
        Self {
            policy,
            query_timeout: None,
        }
    }

    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn policy(&self) -> TransactionPolicy {
        self.policy
    }

    /// Run `work` on a connection drawn from `source`
    pub fn run<T, F>(&self, source: ConnectionSource<'_>, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Connection) -> Result<T>,
    {
        if source.policy() != self.policy {
            return Err(ColmapError::configuration(format!(
                "processor is configured for an {} connection but was given an {} one",
                self.policy,
                source.policy()
            )));
        }

        match source {
            ConnectionSource::Ambient(conn) => {
                Self::apply_timeout(conn, self.query_timeout)?;
                work(conn)
            }
            ConnectionSource::Pool(pool) => {
                let mut conn = pool.acquire()?;
                debug!("Acquired owned connection");
                let outcome = self.run_owned(&mut *conn, work);
                if let Err(e) = pool.release(conn) {
                    warn!("Failed to release connection: {}", e);
                }
                outcome
            }
        }
    }

    fn run_owned<T, F>(&self, conn: &mut dyn Connection, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Connection) -> Result<T>,
    {
        match Self::commit_work(conn, self.query_timeout, work) {
            Ok(value) => {
                debug!("Committed owned transaction");
                Ok(value)
            }
            Err(e) => {
                error!("Rolling back owned transaction: {}", e);
                if let Err(rollback_err) = conn.rollback() {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn commit_work<T, F>(conn: &mut dyn Connection, timeout: Option<Duration>, work: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Connection) -> Result<T>,
    {
        Self::apply_timeout(conn, timeout)?;
        let value = work(&mut *conn)?;
        conn.commit()?;
        Ok(value)
    }

    fn apply_timeout(conn: &mut dyn Connection, timeout: Option<Duration>) -> Result<()> {
        match timeout {
            Some(timeout) => conn.set_query_timeout(timeout),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{RecordingConnection, RecordingPool};

    #[test]
    fn test_owned_commit_and_release() -> Result<()> {
        let pool = RecordingPool::new();
        let scope = TransactionScope::new(TransactionPolicy::Owned)
            .with_query_timeout(Some(Duration::from_secs(5)));

        let out = scope.run(ConnectionSource::Pool(&pool), |_conn| Ok(7))?;
        assert_eq!(out, 7);

        let journal = pool.journal();
        assert_eq!(journal.commits(), 1);
        assert_eq!(journal.rollbacks(), 0);
        assert_eq!(journal.releases(), 1);
        assert_eq!(journal.timeouts(), vec![Duration::from_secs(5)]);
        Ok(())
    }

    #[test]
    fn test_unset_timeout_leaves_session_alone() -> Result<()> {
        let mut conn = RecordingConnection::new();
        TransactionScope::new(TransactionPolicy::Ambient)
            .run(ConnectionSource::Ambient(&mut conn), |_conn| Ok(()))?;
        assert!(conn.journal().timeouts().is_empty());

        let pool = RecordingPool::new();
        TransactionScope::new(TransactionPolicy::Owned)
            .run(ConnectionSource::Pool(&pool), |_conn| Ok(()))?;
        assert!(pool.journal().timeouts().is_empty());
        Ok(())
    }

    #[test]
    fn test_owned_failure_rolls_back_then_releases() {
        let pool = RecordingPool::new();
        let scope = TransactionScope::new(TransactionPolicy::Owned);

        let err = scope
            .run(ConnectionSource::Pool(&pool), |_conn| -> Result<()> {
                Err(ColmapError::missing_required("LRN"))
            })
            .unwrap_err();
        assert!(matches!(err, ColmapError::MissingRequiredValue { .. }));

        let journal = pool.journal();
        assert_eq!(journal.commits(), 0);
        assert_eq!(journal.rollbacks(), 1);
        assert_eq!(journal.releases(), 1);
    }

    #[test]
    fn test_commit_failure_is_rolled_back() {
        let pool = RecordingPool::new();
        pool.journal().fail_next_commit("commit refused");
        let scope = TransactionScope::new(TransactionPolicy::Owned);

        let err = scope.run(ConnectionSource::Pool(&pool), |_conn| Ok(())).unwrap_err();
        assert!(matches!(err, ColmapError::Database { .. }));
        assert_eq!(pool.journal().rollbacks(), 1);
        assert_eq!(pool.journal().releases(), 1);
    }

    #[test]
    fn test_ambient_leaves_transaction_alone() -> Result<()> {
        let mut conn = RecordingConnection::new();
        let scope = TransactionScope::new(TransactionPolicy::Ambient);

        let _ = scope.run(ConnectionSource::Ambient(&mut conn), |_c| -> Result<()> {
            Err(ColmapError::no_data("T"))
        });
        scope.run(ConnectionSource::Ambient(&mut conn), |_c| Ok(()))?;

        let journal = conn.journal();
        assert_eq!(journal.commits(), 0);
        assert_eq!(journal.rollbacks(), 0);
        Ok(())
    }

    #[test]
    fn test_policy_mismatch_is_configuration_error() {
        let pool = RecordingPool::new();
        let scope = TransactionScope::new(TransactionPolicy::Ambient);
        let err = scope.run(ConnectionSource::Pool(&pool), |_c| Ok(())).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(pool.journal().releases(), 0);
    }

    #[test]
    fn test_flag_mapping() {
        assert_eq!(TransactionPolicy::from_transactional_flag(true), TransactionPolicy::Ambient);
        assert_eq!(TransactionPolicy::from_transactional_flag(false), TransactionPolicy::Owned);
    }
}
