//! # Belts
//!
//! A belt is the storage bucket for subjects that carry details. Where a chunk
//! stores values, a belt stores *references*: each [`BeltSlot`] points at a
//! subjective and caches, per class of the belt's [`Detailmark`], the detail
//! cells of that subjective that are instances of the class ("detail lines").
//!
//! ## Membership
//! A belt accepts any subjective whose detail classes are all contained in its
//! detailmark. The mechanism places each subjective in the most specific
//! accepting belt and moves it when it gains a detail outside that belt.
//!
//! ## Slot lifecycle
//! Slots are appended on placement. [`Belt::set_removed`] marks a slot stale
//! and swap-removes it right away when the belt is unlocked; while a chain
//! holds the belt the removal is queued and flushed on the last unlock, so
//! indices a cursor is using never shift.
//!
//! ## Iteration
//! Belts are selected for a chain by detailmark alone. Everything else is
//! checked per slot in [`Belt::prepare_for_iteration`]: the subject's traits
//! (through its chunk), its live flags, its live detail set (including excluded
//! details, which a superset belt may well contain), and at least one enabled
//! detail for every required class. Only the detail lines the filter requires
//! are pinned for the cursor.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::trace;

use crate::engine::error::{ApparatusError, ApparatusResult};
use crate::engine::filter::Filter;
use crate::engine::lock::ExclusiveAccess;
use crate::engine::storage::Line;
use crate::engine::subject::SubjectPool;
use crate::engine::subjective::{DetailCell, Subjective};
use crate::engine::types::{BeltId, BitMask, DetailId, Detailmark, MechanismId};


/// Detail cells of one class, as cached by a belt slot.
pub type DetailLine = SmallVec<[Arc<DetailCell>; 1]>;

/// Detail lines pinned for one slot, keyed by the required class.
pub type PinnedDetails = SmallVec<[(DetailId, DetailLine); 4]>;

struct BeltSlotCache {
    revision: u64,
    lines: Vec<DetailLine>,
}

/// One subjective placed in a belt.
pub struct BeltSlot {
    subjective: Arc<Subjective>,
    stale: AtomicBool,
    cache: Mutex<BeltSlotCache>,
}

impl BeltSlot {
    fn new(subjective: Arc<Subjective>) -> Self {
        Self {
            subjective,
            stale: AtomicBool::new(false),
            cache: Mutex::new(BeltSlotCache { revision: u64::MAX, lines: Vec::new() }),
        }
    }

    /// The placed subjective.
    #[inline]
    pub fn subjective(&self) -> &Arc<Subjective> {
        &self.subjective
    }

    /// Returns `true` once the slot was removed.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    fn fetch_details(&self, detailmark: &Detailmark) -> MutexGuard<'_, BeltSlotCache> {
        let mut cache = self.cache.lock();
        let revision = self.subjective.revision();
        if cache.revision != revision {
            let details = self.subjective.details();
            cache.lines = detailmark
                .details()
                .iter()
                .map(|&class| details.iter().filter(|cell| cell.is_a(class)).cloned().collect())
                .collect();
            cache.revision = revision;
        }
        cache
    }
}

struct BeltState {
    slots: Line<BeltSlot>,
}

/// Reference storage for subjects carrying details.
pub struct Belt {
    id: BeltId,
    mechanism: MechanismId,
    detailmark: Detailmark,
    state: UnsafeCell<BeltState>,
    count: AtomicUsize,
    iterable_count: AtomicUsize,
    locks: AtomicUsize,
    removals: Mutex<Vec<usize>>,
}

// SAFETY: structural mutation of `state` requires the mechanism's exclusive
// access; slots are otherwise only read, and their mutable parts are atomics or
// behind a mutex.
unsafe impl Send for Belt {}
// SAFETY: see above.
unsafe impl Sync for Belt {}

impl Belt {
    pub(crate) fn new(id: BeltId, mechanism: MechanismId, detailmark: Detailmark, block_capacity: usize) -> Self {
        Self {
            id,
            mechanism,
            detailmark,
            state: UnsafeCell::new(BeltState { slots: Line::new(block_capacity) }),
            count: AtomicUsize::new(0),
            iterable_count: AtomicUsize::new(0),
            locks: AtomicUsize::new(0),
            removals: Mutex::new(Vec::new()),
        }
    }

    /// Belt id within its mechanism.
    #[inline]
    pub fn id(&self) -> BeltId {
        self.id
    }

    /// Owning mechanism.
    #[inline]
    pub fn mechanism(&self) -> MechanismId {
        self.mechanism
    }

    /// Detail classes the belt caches lines for.
    #[inline]
    pub fn detailmark(&self) -> &Detailmark {
        &self.detailmark
    }

    /// Number of slots, including stale ones awaiting removal.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Number of slots a cursor may visit.
    #[inline]
    pub fn iterable_count(&self) -> usize {
        self.iterable_count.load(Ordering::Acquire)
    }

    /// Returns `true` while any chain holds the belt.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locks.load(Ordering::Acquire) > 0
    }

    #[inline]
    fn state(&self) -> &BeltState {
        // SAFETY: see `Chunk::state`.
        unsafe { &*self.state.get() }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn state_mut(&self, _access: &ExclusiveAccess<'_>) -> &mut BeltState {
        // SAFETY: the caller holds the mechanism's exclusive access.
        unsafe { &mut *self.state.get() }
    }

    /// Slot at `index`.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&BeltSlot> {
        self.state().slots.get(index)
    }

    /// Construction-time check: the detailmark holds every required class.
    #[inline]
    pub fn matches(&self, filter: &Filter) -> bool {
        self.detailmark.mask().includes(filter.details())
    }

    /// Returns `true` if the belt can hold a subjective with `details`.
    #[inline]
    pub fn accepts(&self, details: &BitMask) -> bool {
        self.detailmark.mask().includes(details)
    }

    fn bump_count(&self, count: usize) {
        self.count.store(count, Ordering::Release);
        if !self.is_locked() {
            self.iterable_count.store(count, Ordering::Release);
        }
    }

    /// Places `subjective` in a new slot.
    pub(crate) fn add(&self, access: &ExclusiveAccess<'_>, subjective: Arc<Subjective>) -> usize {
        let state = self.state_mut(access);
        let index = state.slots.push(BeltSlot::new(Arc::clone(&subjective)));
        subjective.set_placement(Some((self.id, index)));
        self.bump_count(state.slots.len());
        index
    }

    /// Marks slot `index` removed; removes it now or on the last unlock.
    pub(crate) fn set_removed(&self, access: &ExclusiveAccess<'_>, index: usize) -> ApparatusResult<()> {
        let state = self.state_mut(access);
        let length = state.slots.len();
        let slot = state.slots.get(index).ok_or(ApparatusError::OutOfRange { index, length })?;
        slot.stale.store(true, Ordering::Release);
        slot.subjective.replace_placement((self.id, index), None);
        if self.is_locked() {
            self.removals.lock().push(index);
        } else {
            self.remove_now(state, index);
        }
        Ok(())
    }

    fn remove_now(&self, state: &mut BeltState, index: usize) {
        let last = state.slots.len() - 1;
        drop(state.slots.swap_remove(index));
        self.bump_count(state.slots.len());
        if index != last {
            if let Some(moved) = state.slots.get(index) {
                moved.subjective.replace_placement((self.id, last), Some((self.id, index)));
            }
        }
    }

    pub(crate) fn lock(&self) {
        if self.locks.fetch_add(1, Ordering::AcqRel) == 0 {
            self.iterable_count.store(self.count(), Ordering::Release);
        }
    }

    pub(crate) fn unlock(&self, access: &ExclusiveAccess<'_>) {
        let previous = self.locks.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "belt lock released without being taken");
        if previous != 1 {
            return;
        }
        let mut removals = std::mem::take(&mut *self.removals.lock());
        removals.sort_unstable_by(|a, b| b.cmp(a));
        removals.dedup();
        let state = self.state_mut(access);
        let mut removed = 0;
        for index in removals {
            if state.slots.get(index).map_or(false, BeltSlot::is_stale) {
                self.remove_now(state, index);
                removed += 1;
            }
        }
        self.bump_count(state.slots.len());
        if removed > 0 {
            trace!(belt = self.id, removed, "flushed belt removals");
        }
    }

    /// Iteration-time check of slot `index`.
    ///
    /// Returns the pinned detail lines of the filter's required classes, or
    /// `None` if the slot does not match.
    pub fn prepare_for_iteration(
        &self,
        index: usize,
        filter: &Filter,
        pool: &SubjectPool,
    ) -> Option<PinnedDetails> {
        let slot = self.slot(index)?;
        if slot.is_stale() {
            return None;
        }
        let info = pool.info(slot.subjective.subject())?;
        let chunk = info.chunk.as_ref()?;
        if !filter.matches_traits(chunk.traitmark().mask()) {
            return None;
        }
        if !filter.matches_flagmark(chunk.slot(info.slot)?.flagmark()) {
            return None;
        }
        if !filter.matches_details(&slot.subjective.details_mask()) {
            return None;
        }

        let cache = slot.fetch_details(&self.detailmark);
        let mut pinned = PinnedDetails::new();
        for class in filter.details().iter() {
            let class = class as DetailId;
            let line = self.detailmark.line_index_of(class)?;
            let cells: DetailLine = cache.lines.get(line)?
                .iter()
                .filter(|cell| cell.is_enabled())
                .cloned()
                .collect();
            if cells.is_empty() {
                return None;
            }
            pinned.push((class, cells));
        }
        Some(pinned)
    }
}

impl fmt::Debug for Belt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Belt")
            .field("id", &self.id)
            .field("details", &self.detailmark.details())
            .field("count", &self.count())
            .field("iterable_count", &self.iterable_count())
            .finish()
    }
}
