//! Caller-supplied mutual exclusion.
//!
//! A delete followed by an insert must look atomic to other threads sharing
//! the same processor. The engine takes no lock of its own; callers hand a
//! [`CriticalSection`] to the processor and choose how widely it is shared.

use crate::error::Result;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Runs a unit of work under whatever exclusion the caller chose
pub trait CriticalSection: Send + Sync {
    fn run(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()>;
}

/// No exclusion at all
#[derive(Debug, Clone, Copy, Default)]
pub struct Unguarded;

impl CriticalSection for Unguarded {
    fn run(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        work()
    }
}

/// A mutex; clones share the same lock
#[derive(Clone, Default)]
pub struct SharedLock {
    lock: Arc<Mutex<()>>,
}

impl SharedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether two handles guard the same section
    pub fn same_lock(&self, other: &SharedLock) -> bool {
        Arc::ptr_eq(&self.lock, &other.lock)
    }
}

impl fmt::Debug for SharedLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedLock")
            .field("holders", &Arc::strong_count(&self.lock))
            .field("locked", &self.lock.is_locked())
            .finish()
    }
}

impl CriticalSection for SharedLock {
    fn run(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let _guard = self.lock.lock();
        trace!("Entered critical section");
        work()
    }
}
