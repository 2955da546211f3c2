//! Owner-agnostic lock for structural transitions
//!
//! Negotiation takes this lock on the caller's task and the receive loop
//! releases it when the negotiate response has been applied, so acquire and
//! release happen on different threads. A plain mutex guard cannot express
//! that; this is a `locked` flag guarded by a mutex with a condition
//! variable signalling release.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Default)]
pub struct CrossThreadLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl CrossThreadLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free, then take it
    pub fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    /// Take the lock if it is free
    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();
        if *locked {
            return false;
        }
        *locked = true;
        true
    }

    /// Take the lock, waiting at most `timeout`
    pub fn lock_timeout(&self, timeout: Duration) -> Result<()> {
        let mut locked = self.locked.lock();
        let result = self
            .released
            .wait_while_for(&mut locked, |locked| *locked, timeout);
        if result.timed_out() && *locked {
            return Err(Error::TransportTimeout);
        }
        *locked = true;
        Ok(())
    }

    /// Release the lock from any thread. Returns whether it was held.
    pub fn unlock(&self) -> bool {
        let mut locked = self.locked.lock();
        let was_locked = *locked;
        *locked = false;
        drop(locked);
        self.released.notify_one();
        was_locked
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }

    /// Async acquisition. Uncontended acquisition never leaves the task;
    /// a contended wait runs on the blocking pool so the runtime keeps
    /// driving the receive loop that will release the lock.
    ///
    /// Dropping the future mid-wait does not leak the lock: a wait that
    /// succeeds after its caller left releases it again.
    pub async fn lock_async(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        if self.try_lock() {
            return Ok(());
        }
        trace!("Structural lock contended, waiting up to {:?}", timeout);
        let lock = Arc::clone(self);
        let acquired = tokio::task::spawn_blocking(move || -> Result<Acquired> {
            lock.lock_timeout(timeout)?;
            Ok(Acquired { lock: Some(lock) })
        })
        .await
        .map_err(|e| Error::TransportFailure(format!("lock wait aborted: {}", e)))??;
        acquired.keep();
        Ok(())
    }
}

/// A lock taken on the blocking pool, released again unless its caller
/// claims it. The join handle drops an unclaimed result when the waiting
/// future is gone.
struct Acquired {
    lock: Option<Arc<CrossThreadLock>>,
}

impl Acquired {
    fn keep(mut self) {
        self.lock = None;
    }
}

impl Drop for Acquired {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            trace!("Lock acquired for a waiter that left; releasing");
            lock.unlock();
        }
    }
}
