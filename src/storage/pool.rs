//! Bounded connection pool using r2d2.
//!
//! Storage calls run on the blocking thread pool through [`ConnectionPool::run`]:
//! - a semaphore sized to the pool admits at most `max_size` calls at once
//! - the statement timeout starts only once a call has been admitted
//! - a [`CommitGate`] makes a reported timeout final: a transaction whose
//!   caller gave up is rolled back, never committed

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use duckdb::{Connection, DuckdbConnectionManager, Transaction};
use r2d2::{Pool, PooledConnection};
use tokio::sync::Semaphore;

use crate::storage::StorageError;

/// Connection pool shared by catalog, writer and reader operations.
///
/// Connections of an in-memory pool all see the same database instance.
pub struct ConnectionPool {
    pool: Pool<DuckdbConnectionManager>,
    permits: Arc<Semaphore>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_size", &self.pool.max_size())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Open a pool over a database file.
    pub fn open(
        db_path: &Path,
        size: u32,
        checkout_timeout: Duration,
    ) -> Result<Arc<Self>, StorageError> {
        let manager = DuckdbConnectionManager::file(db_path)?;
        Self::build(manager, size, checkout_timeout)
    }

    /// Open a pool over a fresh in-memory database.
    pub fn in_memory(size: u32, checkout_timeout: Duration) -> Result<Arc<Self>, StorageError> {
        let manager = DuckdbConnectionManager::memory()?;
        Self::build(manager, size, checkout_timeout)
    }

    fn build(
        manager: DuckdbConnectionManager,
        size: u32,
        checkout_timeout: Duration,
    ) -> Result<Arc<Self>, StorageError> {
        let size = size.max(1);
        let pool = Pool::builder()
            .max_size(size)
            .connection_timeout(checkout_timeout)
            .build(manager)?;

        Ok(Arc::new(Self {
            pool,
            permits: Arc::new(Semaphore::new(size as usize)),
        }))
    }

    /// Get a connection from the pool.
    pub fn get(&self) -> Result<PooledConnection<DuckdbConnectionManager>, StorageError> {
        Ok(self.pool.get()?)
    }

    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }

    /// Run `f` on a pooled connection off the async runtime.
    ///
    /// Waiting for admission does not count against `timeout`. Once `timeout`
    /// elapses the call reports `StorageError::Timeout`; a transaction that
    /// `f` later hands to the gate is rolled back. If the commit had already
    /// started when the timeout fired, its result is returned instead.
    pub(crate) async fn run<T, F>(
        self: &Arc<Self>,
        op: &'static str,
        timeout: Duration,
        f: F,
    ) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &CommitGate) -> Result<T, StorageError> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StorageError::Internal(format!("{op}: connection pool closed")))?;

        let gate = Arc::new(CommitGate::new(op, timeout));
        let task_gate = Arc::clone(&gate);
        let pool = Arc::clone(self);
        let mut task = tokio::task::spawn_blocking(move || {
            // Held until the blocking work ends, timed out or not.
            let _permit = permit;
            if task_gate.is_cancelled() {
                return Err(task_gate.timeout_error());
            }
            let mut conn = pool.get()?;
            f(&mut *conn, &task_gate)
        });

        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if gate.cancel() => return Err(gate.timeout_error()),
            Err(_) => task.await,
        };
        joined.map_err(|e| StorageError::Internal(format!("{op} task failed: {e}")))?
    }
}

// =============================================================================
// Commit Gate
// =============================================================================

const PENDING: u8 = 0;
const COMMITTING: u8 = 1;
const CANCELLED: u8 = 2;

/// Arbitrates between a blocking call committing and its caller timing out.
///
/// Exactly one side wins: either the commit starts and the caller waits for
/// its result, or the caller reports a timeout and the transaction is rolled back.
#[derive(Debug)]
pub(crate) struct CommitGate {
    state: AtomicU8,
    op: &'static str,
    after: Duration,
}

impl CommitGate {
    fn new(op: &'static str, after: Duration) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            op,
            after,
        }
    }

    /// Commit `tx`, or roll it back if the caller has already timed out.
    pub(crate) fn commit(&self, tx: Transaction<'_>) -> Result<(), StorageError> {
        if self
            .state
            .compare_exchange(PENDING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tx.commit()?;
            Ok(())
        } else {
            tx.rollback()?;
            Err(self.timeout_error())
        }
    }

    /// Caller side. False if a commit is already under way.
    fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn timeout_error(&self) -> StorageError {
        StorageError::Timeout {
            op: self.op,
            after: self.after,
        }
    }
}
