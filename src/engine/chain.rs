//! # Chains
//!
//! A [`Chain`] is the result of [`Mechanism::enchain`]: the ordered list of
//! chunks (or belts) matching a filter, locked for as long as the chain lives,
//! plus a small pool of embedded cursors.
//!
//! ## Users and disposal
//! A chain counts *users*: active cursors and manual [`Chain::retain`]s. It also
//! counts *operatings*: partitions of [`Chain::operate_concurrently`] still
//! running. The chain disposes itself (unlocking every segment and the
//! mechanism) as soon as both counters reach zero after having been used, so a
//! chain is one-shot unless retained:
//!
//! ```text
//! enchain ──> operate ──> last cursor resets ──> disposed
//!                 └─ retain() keeps it alive until release()
//! ```
//!
//! Disposal is idempotent. A compare-and-swap on `disposing` keeps a disposal
//! triggered from inside another one (a cursor dropped while the chain is torn
//! down) from running twice.
//!
//! ## Access during passes
//! A liquid [`Chain::operate`] holds the mechanism's access guard exclusively
//! for the whole pass: the callback may change the mechanism structurally
//! (the exclusive path is reentrant), while other threads wait. A solid pass
//! holds it shared: other threads keep reading, but structural changes and
//! mechanism-level writes are refused with `InvalidState` from inside the
//! pass. Write through the cursor or use the `*_deferred` operations there.
//!
//! ## Concurrency
//! [`Chain::operate_concurrently`] requires a solid chain. It splits the raw
//! iterable range into contiguous partitions, runs each on the rayon pool with
//! its own cursor, and either blocks until all finish or returns immediately
//! (see [`Chain::wait_for_operatings_completion`]). [`Chain::stop_iterating`]
//! requests a cooperative stop checked at every step.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, debug_span, trace, warn};

use crate::engine::belt::Belt;
use crate::engine::chunk::Chunk;
use crate::engine::cursor::Cursor;
use crate::engine::error::{ApparatusError, ApparatusResult, Outcome, Status};
use crate::engine::filter::Filter;
use crate::engine::lock::{ExclusiveAccess, SharedAccess};
use crate::engine::mechanism::{Mechanism, MechanismShared};
use crate::engine::subject::SubjectHandle;
use crate::engine::types::CursorId;


/// One storage bucket of a chain.
#[derive(Clone, Debug)]
pub enum Segment {
    /// A chunk, for filters without details.
    Chunk(Arc<Chunk>),
    /// A belt, for filters with details.
    Belt(Arc<Belt>),
}

impl Segment {
    /// Slots a cursor may visit.
    #[inline]
    pub fn iterable_count(&self) -> usize {
        match self {
            Segment::Chunk(chunk) => chunk.iterable_count(),
            Segment::Belt(belt) => belt.iterable_count(),
        }
    }
}

pub(crate) struct ChainShared {
    pub(crate) mechanism: Arc<MechanismShared>,
    pub(crate) filter: Filter,
    pub(crate) solid: bool,
    pub(crate) segments: Vec<Segment>,
    users: AtomicUsize,
    operatings: AtomicUsize,
    settling: AtomicUsize,
    disposing: AtomicBool,
    disposed: AtomicBool,
    stop: AtomicBool,
    completed: Mutex<()>,
    completed_cv: Condvar,
}

impl ChainShared {
    #[inline]
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn retain_user(&self) {
        self.users.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn release_user(&self) {
        let previous = self.users.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "chain released more often than retained");
        if previous == 1 && self.operatings.load(Ordering::SeqCst) == 0 {
            self.dispose();
        }
    }

    fn dispose_if_unused(&self) {
        if self.users.load(Ordering::SeqCst) == 0 && self.operatings.load(Ordering::SeqCst) == 0 {
            self.dispose();
        }
    }

    fn iterable_num(&self) -> usize {
        self.segments.iter().map(Segment::iterable_count).sum()
    }

    /// Enters a pass: exclusive access for liquid chains, shared for solid
    /// ones. The pass counts as a user until it ends.
    fn pass(&self) -> ApparatusResult<Pass<'_>> {
        let (exclusive, shared) = if self.solid {
            (None, Some(self.mechanism.access.shared()))
        } else {
            (Some(self.mechanism.access.exclusive()?), None)
        };
        self.retain_user();
        Ok(Pass { chain: self, exclusive, shared })
    }

    fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        if self
            .disposing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let access = match self.mechanism.access.exclusive() {
            Ok(access) => access,
            Err(error) => {
                warn!(%error, "chain disposal postponed");
                self.disposing.store(false, Ordering::Release);
                return;
            }
        };
        {
            let mut pool = self.mechanism.machine.subjects_mut();
            for segment in &self.segments {
                match segment {
                    Segment::Chunk(chunk) => chunk.unlock(&access, self.solid, &mut pool),
                    Segment::Belt(belt) => belt.unlock(&access),
                }
            }
        }
        self.mechanism.locks.unlock(self.solid);
        self.disposed.store(true, Ordering::Release);
        drop(access);
        trace!(mechanism = %self.mechanism.config.name, segments = self.segments.len(), solid = self.solid, "chain disposed");
    }

    fn wait_for_operatings(&self) {
        let mut completed = self.completed.lock();
        while self.settling.load(Ordering::SeqCst) > 0 {
            self.completed_cv.wait(&mut completed);
        }
    }
}

impl Drop for ChainShared {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Access held by a running pass. Releases the access before the user, so a
/// disposal triggered by the release can take the guard exclusively.
struct Pass<'a> {
    chain: &'a ChainShared,
    exclusive: Option<ExclusiveAccess<'a>>,
    shared: Option<SharedAccess<'a>>,
}

impl Drop for Pass<'_> {
    fn drop(&mut self) {
        drop(self.exclusive.take());
        drop(self.shared.take());
        self.chain.release_user();
    }
}

/// Finishes a partition, however it finishes: decrements the operatings
/// counter, disposes the chain if it was the last user, then wakes waiters.
struct OperatingGuard<'a> {
    chain: &'a ChainShared,
}

impl Drop for OperatingGuard<'_> {
    fn drop(&mut self) {
        let chain = self.chain;
        let previous = chain.operatings.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && chain.users.load(Ordering::SeqCst) == 0 {
            chain.dispose();
        }
        let _completed = chain.completed.lock();
        chain.settling.fetch_sub(1, Ordering::SeqCst);
        chain.completed_cv.notify_all();
    }
}

fn run_partition<F: Fn(&mut Cursor)>(chain: &Arc<ChainShared>, f: &F, offset: usize, limit: usize) {
    let _operating = OperatingGuard { chain };
    let _access = chain.mechanism.access.shared();
    let mut cursor = Cursor::new();
    if !cursor.begin(chain, offset, limit) {
        return;
    }
    loop {
        f(&mut cursor);
        if !cursor.advance() {
            break;
        }
    }
}

/// Splits `total` raw slots into at most `max_threads` contiguous partitions of
/// at least `min_slots` each. The first partition takes the remainder.
fn partition(total: usize, max_threads: usize, min_slots: usize) -> Vec<(usize, usize)> {
    let threads = (total / min_slots.max(1)).clamp(1, max_threads.max(1));
    let share = total / threads;
    let first = share + total % threads;
    let mut partitions = Vec::with_capacity(threads);
    partitions.push((0, first));
    for index in 1..threads {
        partitions.push((first + (index - 1) * share, share));
    }
    partitions
}

/// A locked, ordered set of segments matching a filter.
pub struct Chain {
    inner: Arc<ChainShared>,
    embedded: Mutex<Vec<Cursor>>,
    retains: AtomicUsize,
}

impl Chain {
    pub(crate) fn new(mechanism: Arc<MechanismShared>, filter: Filter, solid: bool, segments: Vec<Segment>) -> Self {
        let embedded = (0..mechanism.config.embedded_cursors).map(|_| Cursor::new()).collect();
        Self {
            inner: Arc::new(ChainShared {
                mechanism,
                filter,
                solid,
                segments,
                users: AtomicUsize::new(0),
                operatings: AtomicUsize::new(0),
                settling: AtomicUsize::new(0),
                disposing: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                completed: Mutex::new(()),
                completed_cv: Condvar::new(),
            }),
            embedded: Mutex::new(embedded),
            retains: AtomicUsize::new(0),
        }
    }

    fn ensure_live(&self) -> ApparatusResult<()> {
        if self.inner.is_disposed() {
            return Err(ApparatusError::InvalidState("chain is disposed"));
        }
        Ok(())
    }

    /// Calls `f` once per viable slot, in segment order.
    ///
    /// An empty chain with no users disposes and returns `Noop`.
    pub fn operate(&self, mut f: impl FnMut(&mut Cursor)) -> Outcome {
        self.ensure_live()?;
        let _pass = self.inner.pass()?;
        let mut cursor = Cursor::new();
        if !cursor.begin(&self.inner, 0, usize::MAX) {
            return Ok(Status::Noop);
        }
        loop {
            f(&mut cursor);
            if !cursor.advance() {
                break;
            }
        }
        Ok(Status::Success)
    }

    /// Calls `f` once per viable slot from up to `max_threads` rayon workers,
    /// each walking a contiguous range of at least `min_slots_per_thread` raw
    /// slots. With `sync` the call returns once every partition finished; the
    /// calling thread runs the first partition itself.
    ///
    /// Requires a solid chain, and a thread not holding the mechanism's access
    /// guard exclusively (the workers could never enter).
    pub fn operate_concurrently<F>(&self, f: F, max_threads: usize, min_slots_per_thread: usize, sync: bool) -> Outcome
    where
        F: Fn(&mut Cursor) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        if !self.inner.solid {
            return Err(ApparatusError::InvalidOperation("concurrent operating requires a solid chain"));
        }
        if max_threads == 0 {
            return Err(ApparatusError::InvalidArgument("max_threads must be positive"));
        }
        if self.inner.mechanism.access.is_exclusive_here() {
            return Err(ApparatusError::InvalidState("concurrent operating under exclusive access"));
        }
        let total = self.inner.iterable_num();
        if total == 0 {
            self.inner.dispose_if_unused();
            return Ok(Status::Noop);
        }
        let partitions = partition(total, max_threads, min_slots_per_thread);
        let span = debug_span!("operate_concurrently", slots = total, threads = partitions.len(), sync);
        let _entered = span.enter();
        debug!(mechanism = %self.inner.mechanism.config.name, "dispatching partitions");

        self.inner.retain_user();
        self.inner.operatings.fetch_add(partitions.len(), Ordering::SeqCst);
        self.inner.settling.fetch_add(partitions.len(), Ordering::SeqCst);
        if sync {
            let chain = &self.inner;
            let f = &f;
            let _access = chain.mechanism.access.shared();
            rayon::scope(|scope| {
                for &(offset, limit) in &partitions[1..] {
                    scope.spawn(move |_| run_partition(chain, f, offset, limit));
                }
                let (offset, limit) = partitions[0];
                run_partition(chain, f, offset, limit);
            });
        } else {
            let f = Arc::new(f);
            for (offset, limit) in partitions {
                let chain = Arc::clone(&self.inner);
                let f = Arc::clone(&f);
                rayon::spawn(move || run_partition(&chain, &*f, offset, limit));
            }
        }
        self.inner.release_user();
        Ok(Status::Success)
    }

    /// Blocks until every partition of [`Chain::operate_concurrently`] finished.
    pub fn wait_for_operatings_completion(&self) {
        self.inner.wait_for_operatings();
    }

    /// Adds a user, keeping the chain alive across passes.
    pub fn retain(&self) -> Outcome {
        self.ensure_live()?;
        self.retains.fetch_add(1, Ordering::AcqRel);
        self.inner.retain_user();
        Ok(Status::Success)
    }

    /// Drops a user added with [`Chain::retain`].
    pub fn release(&self) -> Outcome {
        let released = self
            .retains
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |retains| retains.checked_sub(1))
            .is_ok();
        if !released {
            return Err(ApparatusError::InvalidState("chain is not retained"));
        }
        self.inner.release_user();
        Ok(Status::Success)
    }

    /// A cursor over `[offset, offset + limit)` raw slots, positioned on the
    /// first viable one. The cursor is inactive if there is none.
    pub fn iterate(&self, offset: usize, limit: usize) -> ApparatusResult<Cursor> {
        self.ensure_live()?;
        let mut cursor = Cursor::new();
        if !cursor.begin(&self.inner, offset, limit) {
            self.inner.dispose_if_unused();
        }
        Ok(cursor)
    }

    fn embedded<R>(&self, id: CursorId, f: impl FnOnce(&mut Cursor) -> R) -> ApparatusResult<R> {
        let mut embedded = self.embedded.lock();
        let length = embedded.len();
        let cursor = embedded.get_mut(id).ok_or(ApparatusError::OutOfRange { index: id, length })?;
        Ok(f(cursor))
    }

    /// Begins embedded cursor `id` over `[offset, offset + limit)`.
    pub fn begin(&self, id: CursorId, offset: usize, limit: usize) -> ApparatusResult<bool> {
        self.ensure_live()?;
        let begun = self.embedded(id, |cursor| cursor.begin(&self.inner, offset, limit))?;
        if !begun {
            self.inner.dispose_if_unused();
        }
        Ok(begun)
    }

    /// Advances embedded cursor `id`.
    pub fn advance(&self, id: CursorId) -> ApparatusResult<bool> {
        self.embedded(id, Cursor::advance)
    }

    /// Runs `f` on embedded cursor `id`.
    pub fn with_cursor<R>(&self, id: CursorId, f: impl FnOnce(&mut Cursor) -> R) -> ApparatusResult<R> {
        self.embedded(id, f)
    }

    /// Handles of every viable subject. A full pass like any other: it consumes
    /// the chain unless the chain is retained.
    pub fn subjects(&self) -> ApparatusResult<Vec<SubjectHandle>> {
        let mut subjects = Vec::with_capacity(self.iterable_num());
        let mut cursor = self.iterate(0, usize::MAX)?;
        while cursor.is_active() {
            subjects.push(cursor.subject());
            cursor.advance();
        }
        Ok(subjects)
    }

    /// Raw slots the chain spans.
    #[inline]
    pub fn iterable_num(&self) -> usize {
        self.inner.iterable_num()
    }

    /// Number of segments.
    #[inline]
    pub fn segments_num(&self) -> usize {
        self.inner.segments.len()
    }

    /// Current users: active cursors plus retains.
    #[inline]
    pub fn users_num(&self) -> usize {
        self.inner.users.load(Ordering::SeqCst)
    }

    /// Partitions still running.
    #[inline]
    pub fn operatings_num(&self) -> usize {
        self.inner.operatings.load(Ordering::SeqCst)
    }

    /// Returns `true` once the chain has unlocked its segments.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Returns `true` for chains built by [`Mechanism::enchain_solid`].
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.inner.solid
    }

    /// Asks every cursor of the chain to stop at its next step.
    pub fn stop_iterating(&self) {
        self.inner.stop.store(true, Ordering::Release);
    }

    /// Returns `true` once [`Chain::stop_iterating`] was called.
    #[inline]
    pub fn should_stop(&self) -> bool {
        self.inner.should_stop()
    }

    /// The filter the chain was built from.
    #[inline]
    pub fn filter(&self) -> &Filter {
        &self.inner.filter
    }

    /// Handle to the chain's mechanism.
    pub fn mechanism(&self) -> Mechanism {
        Mechanism::from_shared(Arc::clone(&self.inner.mechanism))
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        self.inner.wait_for_operatings();
        for cursor in self.embedded.get_mut().iter_mut() {
            cursor.reset();
        }
        let retains = std::mem::take(self.retains.get_mut());
        if retains > 0 {
            warn!(retains, "chain dropped while retained");
            for _ in 0..retains {
                self.inner.release_user();
            }
        }
        self.inner.dispose_if_unused();
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("segments", &self.segments_num())
            .field("iterable", &self.iterable_num())
            .field("solid", &self.is_solid())
            .field("users", &self.users_num())
            .field("operatings", &self.operatings_num())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
