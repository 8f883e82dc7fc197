//! # Access and Lock Tracking
//!
//! This module implements the two synchronisation primitives of a mechanism.
//!
//! ## AccessGuard
//!
//! A reader/writer lock over the mechanism's structural state (chunk and belt
//! arrays, filter caches, slot placement). Structural operations take it
//! exclusively; lookups take it shared.
//!
//! - The exclusive path is **reentrant** per thread: a thread that already
//!   holds exclusive access may acquire it again.
//! - A shared request from a thread that already holds exclusive or shared
//!   access is a no-op, so nested lookups never queue behind a waiting writer.
//! - An exclusive request from a thread that holds shared access cannot be
//!   granted without deadlocking; it is rejected with `InvalidState`.
//! - Shared requests join readers already inside even when a writer is
//!   queued, so the workers of a solid pass never wait behind a writer that
//!   itself waits for the pass.
//!
//! Threads are identified by a small per-thread token rather than
//! `ThreadId`, so ownership checks are a single atomic load.
//!
//! ## LocksCount
//!
//! A signed counter of the chains currently holding a mechanism:
//!
//! | Value | Meaning |
//! |------:|--------|
//! | `0`   | Unlocked |
//! | `> 0` | Liquid-locked by that many chains (structural changes allowed, removals deferred) |
//! | `< 0` | Solid-locked by that many chains (structural changes forbidden) |
//!
//! Mixing the two modes is rejected: a liquid lock cannot be taken while the
//! counter is negative and vice versa.

use std::cell::RefCell;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::lock_api::{RawRwLock as _, RawRwLockRecursive as _};
use parking_lot::RawRwLock;
use smallvec::SmallVec;

use crate::engine::error::{ApparatusError, ApparatusResult};


static NEXT_THREAD_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: u64 = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
    static SHARED_HELD: RefCell<SmallVec<[usize; 4]>> = RefCell::new(SmallVec::new());
}

#[inline]
fn thread_token() -> u64 {
    THREAD_TOKEN.with(|token| *token)
}

/// Reader/writer lock with a reentrant exclusive path.
pub struct AccessGuard {
    raw: RawRwLock,
    owner: AtomicU64,
    depth: AtomicUsize,
}

impl Default for AccessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGuard {
    /// Creates an unlocked guard.
    pub const fn new() -> Self {
        Self {
            raw: RawRwLock::INIT,
            owner: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
        }
    }

    #[inline]
    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Returns `true` if the calling thread holds exclusive access.
    #[inline]
    pub fn is_exclusive_here(&self) -> bool {
        self.owner.load(Ordering::Acquire) == thread_token()
    }

    /// Returns `true` if the calling thread holds shared access.
    pub fn is_shared_here(&self) -> bool {
        let key = self.key();
        SHARED_HELD.with(|held| held.borrow().contains(&key))
    }

    /// Acquires exclusive access, blocking until it is available.
    pub fn exclusive(&self) -> ApparatusResult<ExclusiveAccess<'_>> {
        if self.is_exclusive_here() {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return Ok(ExclusiveAccess { guard: self });
        }
        if self.is_shared_here() {
            return Err(ApparatusError::InvalidState(
                "exclusive access requested while holding shared access",
            ));
        }
        self.raw.lock_exclusive();
        self.owner.store(thread_token(), Ordering::Release);
        self.depth.store(1, Ordering::Relaxed);
        Ok(ExclusiveAccess { guard: self })
    }

    /// Acquires shared access, blocking while another thread is exclusive.
    pub fn shared(&self) -> SharedAccess<'_> {
        if self.is_exclusive_here() || self.is_shared_here() {
            return SharedAccess { guard: None };
        }
        self.raw.lock_shared_recursive();
        let key = self.key();
        SHARED_HELD.with(|held| held.borrow_mut().push(key));
        SharedAccess { guard: Some(self) }
    }
}

/// RAII scope of exclusive access.
///
/// Also serves as proof of exclusivity for the structural operations of chunks
/// and belts.
pub struct ExclusiveAccess<'a> {
    guard: &'a AccessGuard,
}

impl ExclusiveAccess<'_> {
    /// The guard this scope belongs to.
    #[inline]
    pub fn guard(&self) -> &AccessGuard {
        self.guard
    }
}

impl Drop for ExclusiveAccess<'_> {
    fn drop(&mut self) {
        let previous = self.guard.depth.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(previous > 0, "exclusive access released more often than taken");
        if previous == 1 {
            self.guard.owner.store(0, Ordering::Release);
            // SAFETY: depth reached zero on the owning thread, which acquired
            // the raw lock exclusively in `AccessGuard::exclusive`.
            unsafe { self.guard.raw.unlock_exclusive() };
        }
    }
}

/// RAII scope of shared access.
pub struct SharedAccess<'a> {
    guard: Option<&'a AccessGuard>,
}

impl Drop for SharedAccess<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard else { return };
        let key = guard.key();
        SHARED_HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(position) = held.iter().rposition(|&entry| entry == key) {
                held.swap_remove(position);
            }
        });
        // SAFETY: this scope acquired the raw lock shared in `AccessGuard::shared`.
        unsafe { guard.raw.unlock_shared() };
    }
}

/// Signed liquid/solid lock counter.
#[derive(Debug, Default)]
pub struct LocksCount(AtomicI32);

impl LocksCount {
    /// Creates an unlocked counter.
    pub const fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    /// Current raw value.
    #[inline]
    pub fn get(&self) -> i32 {
        self.0.load(Ordering::Acquire)
    }

    /// Takes a liquid lock.
    pub fn liquify(&self) -> ApparatusResult<()> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current >= 0).then(|| current + 1)
            })
            .map(|_| ())
            .map_err(|_| ApparatusError::InvalidState("cannot liquify a solid mechanism"))
    }

    /// Takes a solid lock.
    pub fn solidify(&self) -> ApparatusResult<()> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current <= 0).then(|| current - 1)
            })
            .map(|_| ())
            .map_err(|_| ApparatusError::InvalidState("cannot solidify a liquid mechanism"))
    }

    /// Releases a liquid lock.
    pub fn deliquify(&self) {
        let previous = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "liquid lock released without being taken");
    }

    /// Releases a solid lock.
    pub fn desolidify(&self) {
        let previous = self.0.fetch_add(1, Ordering::AcqRel);
        debug_assert!(previous < 0, "solid lock released without being taken");
    }

    /// Releases a lock of either mode.
    #[inline]
    pub fn unlock(&self, solid: bool) {
        if solid {
            self.desolidify();
        } else {
            self.deliquify();
        }
    }

    /// Returns `true` while any solid lock is held.
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.get() < 0
    }

    /// Returns `true` unless a solid lock is held.
    #[inline]
    pub fn is_liquid(&self) -> bool {
        self.get() >= 0
    }

    /// Returns `true` while any lock is held.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.get() != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_is_reentrant_and_shared_is_a_no_op_inside_it() {
        let guard = AccessGuard::new();
        let outer = guard.exclusive().unwrap();
        let inner = guard.exclusive().unwrap();
        let shared = guard.shared();
        drop(shared);
        drop(inner);
        assert!(guard.is_exclusive_here());
        drop(outer);
        assert!(!guard.is_exclusive_here());
    }

    #[test]
    fn exclusive_inside_shared_is_rejected() {
        let guard = AccessGuard::new();
        let shared = guard.shared();
        assert!(matches!(guard.exclusive(), Err(ApparatusError::InvalidState(_))));
        drop(shared);
        assert!(guard.exclusive().is_ok());
    }

    #[test]
    fn readers_join_while_a_writer_is_queued() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let guard = Arc::new(AccessGuard::new());
        let reading = guard.shared();
        let wrote = Arc::new(AtomicBool::new(false));
        let writer = {
            let guard = Arc::clone(&guard);
            let wrote = Arc::clone(&wrote);
            thread::spawn(move || {
                let _access = guard.exclusive().unwrap();
                wrote.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(30));
        let joined = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                let _access = guard.shared();
            })
        };
        joined.join().unwrap();
        assert!(!wrote.load(Ordering::SeqCst));
        drop(reading);
        writer.join().unwrap();
        assert!(wrote.load(Ordering::SeqCst));
    }

    #[test]
    fn locks_count_rejects_mixed_modes() {
        let locks = LocksCount::new();
        locks.liquify().unwrap();
        locks.liquify().unwrap();
        assert!(locks.solidify().is_err());
        locks.deliquify();
        locks.deliquify();
        locks.solidify().unwrap();
        assert!(locks.is_solid());
        assert!(locks.liquify().is_err());
        locks.desolidify();
        assert!(!locks.is_locked());
    }
}
