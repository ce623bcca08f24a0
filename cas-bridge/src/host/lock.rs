//! Host runtime lock
//!
//! Handler code may only execute while the calling thread holds the single,
//! process-wide host lock. Engine threads call into the bridge without it, so
//! every re-entry point acquires it through [`ensure`] for exactly the
//! duration of the dynamic call. The lock is re-entrant: host code that
//! already holds it may call bridge entry points which acquire it again.
//!
//! The reverse direction (host code blocking on engine I/O) must release the
//! lock while it waits, see [`HostGuard::allow_threads`].

use std::cell::Cell;

use parking_lot::{const_reentrant_mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::trace;

use crate::error::{BridgeError, Result};

static HOST_LOCK: ReentrantMutex<()> = const_reentrant_mutex(());

thread_local! {
    /// Number of live [`HostGuard`]s on this thread.
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Scoped ownership of the host lock.
///
/// Dropping the guard releases one level of acquisition, on every exit path
/// including unwinding. The guard is tied to the acquiring thread.
pub struct HostGuard {
    guard: ReentrantMutexGuard<'static, ()>,
}

/// Acquire the host lock for the calling thread, blocking until available.
pub fn ensure() -> HostGuard {
    let guard = HOST_LOCK.lock();
    DEPTH.with(|d| d.set(d.get() + 1));
    HostGuard { guard }
}

/// Run `f` with the host lock held.
pub fn with_host<R>(f: impl FnOnce(&mut HostGuard) -> R) -> R {
    let mut guard = ensure();
    f(&mut guard)
}

/// Returns `true` if the calling thread currently holds the host lock.
pub fn is_held() -> bool {
    depth() > 0
}

/// How many times the calling thread currently holds the host lock.
pub fn depth() -> usize {
    DEPTH.with(|d| d.get())
}

impl HostGuard {
    /// Release the host lock while `f` runs and re-acquire it afterwards.
    ///
    /// Engine work serviced inside `f` may call back into the bridge from
    /// other threads, which need the lock. A thread holding the lock more than
    /// once cannot release it fully, so this returns
    /// [`BridgeError::NestedHostLock`] instead of risking a deadlock.
    pub fn allow_threads<R>(&mut self, f: impl FnOnce() -> R) -> Result<R> {
        if depth() != 1 {
            return Err(BridgeError::NestedHostLock);
        }

        struct Restore;
        impl Drop for Restore {
            fn drop(&mut self) {
                DEPTH.with(|d| d.set(1));
            }
        }

        DEPTH.with(|d| d.set(0));
        let _restore = Restore;
        trace!("host lock released");
        let result = ReentrantMutexGuard::unlocked(&mut self.guard, f);
        trace!("host lock re-acquired");
        Ok(result)
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
