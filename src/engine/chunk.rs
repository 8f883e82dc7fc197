//! # Chunks
//!
//! A chunk stores every subject of one exact [`Traitmark`] as a structure of
//! arrays: one [`Line`] per trait (in traitmark order) plus a line of
//! [`ChunkSlot`]s holding each row's subject handle and live flagmark. All lines
//! are parallel-indexed by slot.
//!
//! ## Slot lifecycle
//! - **Reserve**: a new row is appended to every line. Chunks have no internal
//!   free list.
//! - **Release**: the row is marked `Stale`. If the chunk is unlocked it is
//!   swap-removed immediately and the subject moved into the hole is re-pointed;
//!   if the chunk is locked, removal is queued until the last unlock.
//! - **Migration**: when a subject's trait set changes, its row is copied
//!   (`overwrite_traits`, used while the source is locked) or moved
//!   (`swap_traits`) into the chunk of the new traitmark.
//!
//! ## Locking
//! Chains lock the chunks they iterate. The first lock freezes
//! `iterable_count` at the current `count`, so rows appended during iteration
//! are not visited; the last unlock flushes queued removals and makes every row
//! iterable again.
//!
//! ## Trait access
//! Access by *line index* is O(1) and is what cursors use once they have mapped
//! the filter's traits onto this chunk's lines. Access by type scans the lines.
//!
//! ## Invariants
//! - Every line has exactly `count` elements, in lock-step with the slots.
//! - `iterable_count <= count`; both are equal while unlocked.
//! - Rows below `iterable_count` never move while the chunk is locked.
//!
//! ## Safety
//! Structural state lives in an `UnsafeCell`. Every mutating method requires an
//! [`ExclusiveAccess`] of the owning mechanism as proof that no other structural
//! operation runs concurrently. Element pointers handed to cursors stay valid
//! across appends because lines never move their blocks.

use std::any::TypeId;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::engine::component::{Trait, TraitBundle};
use crate::engine::error::{ApparatusError, ApparatusResult, TypeMismatchError};
use crate::engine::filter::Filter;
use crate::engine::flags::{Flag, Flagmark};
use crate::engine::lock::ExclusiveAccess;
use crate::engine::machine::Machine;
use crate::engine::record::SubjectRecord;
use crate::engine::storage::{ErasedLine, Line};
use crate::engine::subject::{SubjectHandle, SubjectPool};
use crate::engine::types::{ChunkId, MechanismId, TraitId, Traitmark};


/// Per-row bookkeeping of a chunk.
pub struct ChunkSlot {
    subject: AtomicU64,
    flagmark: AtomicU32,
}

impl ChunkSlot {
    fn new(subject: SubjectHandle, flagmark: Flagmark) -> Self {
        Self {
            subject: AtomicU64::new(subject.to_bits()),
            flagmark: AtomicU32::new(flagmark.0),
        }
    }

    /// Subject stored in the row ([`SubjectHandle::INVALID`] after a hard release).
    #[inline]
    pub fn subject(&self) -> SubjectHandle {
        SubjectHandle::from_bits(self.subject.load(Ordering::Acquire))
    }

    /// Live flagmark.
    #[inline]
    pub fn flagmark(&self) -> Flagmark {
        Flagmark(self.flagmark.load(Ordering::Acquire))
    }

    /// Sets or clears `flag`, returning its previous state.
    #[inline]
    pub fn set_flag(&self, flag: Flag, state: bool) -> bool {
        let bit = flag.mark().0;
        let previous = if state {
            self.flagmark.fetch_or(bit, Ordering::AcqRel)
        } else {
            self.flagmark.fetch_and(!bit, Ordering::AcqRel)
        };
        previous & bit != 0
    }

    /// Returns `true` if the row was released.
    #[inline]
    pub fn is_stale(&self) -> bool {
        self.flagmark().has(Flag::Stale)
    }
}

pub(crate) struct ChunkState {
    lines: Vec<Box<dyn ErasedLine>>,
    slots: Line<ChunkSlot>,
}

/// Structure-of-arrays storage for all subjects of one traitmark.
pub struct Chunk {
    id: ChunkId,
    mechanism: MechanismId,
    traitmark: Traitmark,
    state: UnsafeCell<ChunkState>,
    count: AtomicUsize,
    iterable_count: AtomicUsize,
    locks: AtomicUsize,
    solid_locks: AtomicUsize,
    removals: Mutex<Vec<usize>>,
}

// SAFETY: structural mutation of `state` requires the mechanism's exclusive
// access; concurrent readers only touch rows that are not being moved.
unsafe impl Send for Chunk {}
// SAFETY: see above.
unsafe impl Sync for Chunk {}

impl Chunk {
    pub(crate) fn new(
        id: ChunkId,
        mechanism: MechanismId,
        traitmark: Traitmark,
        machine: &Machine,
        block_capacity: usize,
    ) -> ApparatusResult<Self> {
        let lines = traitmark
            .traits()
            .iter()
            .map(|&trait_id| {
                machine
                    .trait_desc(trait_id)
                    .map(|desc| (desc.factory)(block_capacity))
                    .ok_or(ApparatusError::Missing("trait descriptor"))
            })
            .collect::<ApparatusResult<Vec<_>>>()?;
        Ok(Self {
            id,
            mechanism,
            traitmark,
            state: UnsafeCell::new(ChunkState { lines, slots: Line::new(block_capacity) }),
            count: AtomicUsize::new(0),
            iterable_count: AtomicUsize::new(0),
            locks: AtomicUsize::new(0),
            solid_locks: AtomicUsize::new(0),
            removals: Mutex::new(Vec::new()),
        })
    }

    /// Chunk id within its mechanism.
    #[inline]
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Owning mechanism.
    #[inline]
    pub fn mechanism(&self) -> MechanismId {
        self.mechanism
    }

    /// Stored trait set.
    #[inline]
    pub fn traitmark(&self) -> &Traitmark {
        &self.traitmark
    }

    /// Number of rows, including stale ones awaiting removal.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Number of rows a cursor may visit.
    #[inline]
    pub fn iterable_count(&self) -> usize {
        self.iterable_count.load(Ordering::Acquire)
    }

    /// Number of chains currently holding the chunk.
    #[inline]
    pub fn locks_num(&self) -> usize {
        self.locks.load(Ordering::Acquire)
    }

    /// Number of solid chains currently holding the chunk.
    #[inline]
    pub fn solid_locks_num(&self) -> usize {
        self.solid_locks.load(Ordering::Acquire)
    }

    /// Returns `true` while any chain holds the chunk.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locks_num() > 0
    }

    /// Number of trait lines.
    #[inline]
    pub fn trait_lines_num(&self) -> usize {
        self.traitmark.len()
    }

    #[inline]
    fn state(&self) -> &ChunkState {
        // SAFETY: shared views never coexist with a structural mutation of the
        // rows they read (see the module docs).
        unsafe { &*self.state.get() }
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn state_mut(&self, _access: &ExclusiveAccess<'_>) -> &mut ChunkState {
        // SAFETY: the caller holds the mechanism's exclusive access, and every
        // structural method ends its use of the state before returning.
        unsafe { &mut *self.state.get() }
    }

    /// Returns `true` if the chunk's traitmark satisfies the trait part of `filter`.
    #[inline]
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.matches_traits(self.traitmark.mask())
    }

    /// Iteration-time check of row `index`.
    #[inline]
    pub fn slot_matches(&self, index: usize, filter: &Filter) -> bool {
        self.slot(index)
            .map_or(false, |slot| filter.matches_flagmark(slot.flagmark()))
    }

    /// Row bookkeeping at `index`.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<&ChunkSlot> {
        self.state().slots.get(index)
    }

    /// Line index of `trait_id`.
    #[inline]
    pub fn line_index_of(&self, trait_id: TraitId) -> Option<usize> {
        self.traitmark.line_index_of(trait_id)
    }

    /// Line index of the line storing `type_id`, found by scanning.
    pub fn line_index_by_type(&self, type_id: TypeId) -> Option<usize> {
        self.state()
            .lines
            .iter()
            .position(|line| line.element_type_id() == type_id)
    }

    /// Element type of line `line`.
    #[inline]
    pub fn line_type_id(&self, line: usize) -> Option<TypeId> {
        self.state().lines.get(line).map(|line| line.element_type_id())
    }

    /// Pointer to row `index` of line `line`, if that line stores `T`.
    ///
    /// # Safety
    /// The caller must not create conflicting references to the same element.
    #[inline]
    pub unsafe fn line_ptr<T: 'static>(&self, line: usize, index: usize) -> Option<*mut T> {
        let line = self.state().lines.get(line)?.as_any().downcast_ref::<Line<T>>()?;
        // SAFETY: bounds checked; aliasing is the caller's obligation.
        (index < line.len()).then(|| unsafe { line.ptr(index) })
    }

    /// Pointer to trait `T` of row `index`, found by scanning the lines.
    ///
    /// # Safety
    /// See [`Chunk::line_ptr`].
    #[inline]
    pub unsafe fn trait_ptr<T: 'static>(&self, index: usize) -> Option<*mut T> {
        let line = self.line_index_by_type(TypeId::of::<T>())?;
        // SAFETY: forwarded to the caller.
        unsafe { self.line_ptr(line, index) }
    }

    /// Copy of trait `T` at row `index`.
    pub fn get_trait<T: Trait>(&self, index: usize) -> Option<T> {
        let line = self.line_index_by_type(TypeId::of::<T>())?;
        self.state().lines[line]
            .as_any()
            .downcast_ref::<Line<T>>()?
            .get(index)
            .cloned()
    }

    /// Overwrites trait `T` at row `index`.
    pub(crate) fn write_trait<T: Trait>(
        &self,
        access: &ExclusiveAccess<'_>,
        index: usize,
        value: T,
    ) -> ApparatusResult<()> {
        let state = self.state_mut(access);
        let line = state
            .lines
            .iter_mut()
            .find_map(|line| line.as_any_mut().downcast_mut::<Line<T>>())
            .ok_or(ApparatusError::Missing("trait line"))?;
        let length = line.len();
        let slot = line.get_mut(index).ok_or(ApparatusError::OutOfRange { index, length })?;
        *slot = value;
        Ok(())
    }

    /// Overwrites trait `trait_id` at row `index` with a boxed value.
    pub(crate) fn write_boxed(
        &self,
        access: &ExclusiveAccess<'_>,
        index: usize,
        trait_id: TraitId,
        value: Box<dyn std::any::Any + Send>,
    ) -> ApparatusResult<()> {
        let line = self.line_index_of(trait_id).ok_or(ApparatusError::Missing("trait line"))?;
        self.state_mut(access).lines[line].write_boxed(index, value)
    }

    /// Detached copy of row `index`: its traits and user-level flags.
    pub(crate) fn record_row(&self, index: usize) -> ApparatusResult<SubjectRecord> {
        let state = self.state();
        let length = state.slots.len();
        let slot = state.slots.get(index).ok_or(ApparatusError::OutOfRange { index, length })?;
        let mut record = SubjectRecord::with_flagmark(slot.flagmark());
        for (line, &trait_id) in state.lines.iter().zip(self.traitmark.traits()) {
            record.insert_recorded(trait_id, line.record(index)?);
        }
        Ok(record)
    }

    fn bump_count(&self, count: usize) {
        self.count.store(count, Ordering::Release);
        if !self.is_locked() {
            self.iterable_count.store(count, Ordering::Release);
        }
    }

    /// Appends a row for `subject`, taking initial values from `bundle` and
    /// defaulting the rest. Values for traits outside the traitmark stay in
    /// the bundle.
    pub(crate) fn reserve_subject_slot(
        &self,
        access: &ExclusiveAccess<'_>,
        subject: SubjectHandle,
        flagmark: Flagmark,
        bundle: &mut TraitBundle,
    ) -> ApparatusResult<usize> {
        let state = self.state_mut(access);
        for (trait_id, value) in bundle.iter() {
            let Some(line) = self.traitmark.line_index_of(trait_id) else { continue };
            let line = &state.lines[line];
            if (*value).type_id() != line.element_type_id() {
                return Err(TypeMismatchError {
                    expected: line.element_type_name(),
                    actual: "<bundled value>",
                }
                .into());
            }
        }
        for (line, &trait_id) in state.lines.iter_mut().zip(self.traitmark.traits()) {
            match bundle.take(trait_id) {
                Some(value) => {
                    line.push_boxed(value)?;
                }
                None => {
                    line.push_default();
                }
            }
        }
        let index = state.slots.push(ChunkSlot::new(subject, flagmark));
        self.bump_count(state.slots.len());
        Ok(index)
    }

    /// Appends a copy of row `index` for `subject`. Engine-managed flags are
    /// not copied.
    pub(crate) fn clone_subject_at(
        &self,
        access: &ExclusiveAccess<'_>,
        index: usize,
        subject: SubjectHandle,
    ) -> ApparatusResult<usize> {
        let state = self.state_mut(access);
        let flagmark = state
            .slots
            .get(index)
            .map(|slot| slot.flagmark())
            .ok_or(ApparatusError::OutOfRange { index, length: state.slots.len() })?;
        for line in state.lines.iter_mut() {
            line.clone_row(index)?;
        }
        let flagmark = flagmark.with(Flag::Stale, false).with(Flag::DeferredDespawn, false);
        let new_index = state.slots.push(ChunkSlot::new(subject, flagmark));
        self.bump_count(state.slots.len());
        Ok(new_index)
    }

    /// Copies row `index` into `target` for `subject`: traits shared by both
    /// traitmarks are cloned, the rest of the target row is defaulted. The
    /// source row is left untouched.
    pub(crate) fn overwrite_traits(
        &self,
        access: &ExclusiveAccess<'_>,
        index: usize,
        target: &Chunk,
        subject: SubjectHandle,
    ) -> ApparatusResult<usize> {
        debug_assert!(!std::ptr::eq(self, target));
        let source = self.state_mut(access);
        let flagmark = source
            .slots
            .get(index)
            .map(|slot| slot.flagmark())
            .ok_or(ApparatusError::OutOfRange { index, length: source.slots.len() })?;
        let destination = target.state_mut(access);
        for (line, trait_id) in destination.lines.iter_mut().zip(target.traitmark.traits()) {
            match self.traitmark.line_index_of(*trait_id) {
                Some(from) => {
                    source.lines[from].clone_row_into(index, line.as_mut())?;
                }
                None => {
                    line.push_default();
                }
            }
        }
        let new_index = destination.slots.push(ChunkSlot::new(subject, flagmark));
        target.bump_count(destination.slots.len());
        Ok(new_index)
    }

    /// Moves row `index` into `target`: traits shared by both traitmarks are
    /// moved, the rest of the target row is defaulted, and the source row is
    /// swap-removed. Requires the source to be unlocked.
    pub(crate) fn swap_traits(
        &self,
        access: &ExclusiveAccess<'_>,
        index: usize,
        target: &Chunk,
        pool: &mut SubjectPool,
    ) -> ApparatusResult<usize> {
        debug_assert!(!std::ptr::eq(self, target));
        if self.is_locked() {
            return Err(ApparatusError::InvalidState("cannot move rows out of a locked chunk"));
        }
        let source = self.state_mut(access);
        let length = source.slots.len();
        let slot = source
            .slots
            .get(index)
            .ok_or(ApparatusError::OutOfRange { index, length })?;
        let (subject, flagmark) = (slot.subject(), slot.flagmark());

        let destination = target.state_mut(access);
        let mut moved = vec![false; source.lines.len()];
        for (line, trait_id) in destination.lines.iter_mut().zip(target.traitmark.traits()) {
            match self.traitmark.line_index_of(*trait_id) {
                Some(from) => {
                    source.lines[from].move_into(index, line.as_mut())?;
                    moved[from] = true;
                }
                None => {
                    line.push_default();
                }
            }
        }
        for (line, moved) in source.lines.iter_mut().zip(moved) {
            if !moved {
                line.swap_remove(index);
            }
        }
        self.finish_slot_removal(source, index, pool);

        let new_index = destination.slots.push(ChunkSlot::new(subject, flagmark));
        target.bump_count(destination.slots.len());
        Ok(new_index)
    }

    /// Marks row `index` stale. Removes it right away if the chunk is unlocked,
    /// otherwise queues it for the last unlock. A hard release also clears the
    /// row's subject.
    pub(crate) fn release_slot(
        &self,
        access: &ExclusiveAccess<'_>,
        index: usize,
        hard: bool,
        pool: &mut SubjectPool,
    ) -> ApparatusResult<()> {
        let state = self.state_mut(access);
        let length = state.slots.len();
        let slot = state.slots.get(index).ok_or(ApparatusError::OutOfRange { index, length })?;
        slot.set_flag(Flag::Stale, true);
        if hard {
            slot.subject.store(SubjectHandle::INVALID.to_bits(), Ordering::Release);
        }
        if self.is_locked() {
            self.removals.lock().push(index);
        } else {
            self.remove_row(state, index, pool);
        }
        Ok(())
    }

    fn remove_row(&self, state: &mut ChunkState, index: usize, pool: &mut SubjectPool) {
        for line in state.lines.iter_mut() {
            line.swap_remove(index);
        }
        self.finish_slot_removal(state, index, pool);
    }

    fn finish_slot_removal(&self, state: &mut ChunkState, index: usize, pool: &mut SubjectPool) {
        let last = state.slots.len() - 1;
        drop(state.slots.swap_remove(index));
        self.bump_count(state.slots.len());
        if index == last {
            return;
        }
        let Some(moved) = state.slots.get(index).map(ChunkSlot::subject) else { return };
        if let Some(info) = pool.info_mut(moved) {
            let here = info
                .chunk
                .as_ref()
                .map_or(false, |chunk| std::ptr::eq(Arc::as_ptr(chunk), self));
            if here && info.slot == last {
                info.slot = index;
            }
        }
    }

    /// Pops trailing stale rows. Returns how many were removed.
    pub(crate) fn do_pop(&self, access: &ExclusiveAccess<'_>) -> usize {
        let state = self.state_mut(access);
        let mut popped = 0;
        while !state.slots.is_empty() {
            let last = state.slots.len() - 1;
            if !state.slots.get(last).map_or(false, ChunkSlot::is_stale) {
                break;
            }
            for line in state.lines.iter_mut() {
                line.truncate(last);
            }
            drop(state.slots.pop());
            popped += 1;
        }
        if popped > 0 {
            self.bump_count(state.slots.len());
        }
        popped
    }

    /// Takes a lock. The first lock freezes the iterable prefix.
    pub(crate) fn lock(&self, solid: bool) {
        if self.locks.fetch_add(1, Ordering::AcqRel) == 0 {
            self.iterable_count.store(self.count(), Ordering::Release);
        }
        if solid {
            self.solid_locks.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Releases a lock. The last unlock flushes queued removals and makes every
    /// row iterable.
    pub(crate) fn unlock(&self, access: &ExclusiveAccess<'_>, solid: bool, pool: &mut SubjectPool) {
        if solid {
            let previous = self.solid_locks.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "solid chunk lock released without being taken");
        }
        let previous = self.locks.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "chunk lock released without being taken");
        if previous == 1 {
            self.flush(access, pool);
        }
    }

    fn flush(&self, access: &ExclusiveAccess<'_>, pool: &mut SubjectPool) {
        let mut removals = std::mem::take(&mut *self.removals.lock());
        let popped = self.do_pop(access);
        removals.sort_unstable_by(|a, b| b.cmp(a));
        removals.dedup();
        let state = self.state_mut(access);
        let mut removed = 0;
        for index in removals {
            let stale = state.slots.get(index).map_or(false, ChunkSlot::is_stale);
            if stale {
                self.remove_row(state, index, pool);
                removed += 1;
            }
        }
        self.bump_count(state.slots.len());
        if popped + removed > 0 {
            trace!(chunk = self.id, popped, removed, "flushed chunk removals");
        }
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("traits", &self.traitmark.traits())
            .field("count", &self.count())
            .field("iterable_count", &self.iterable_count())
            .field("locks", &self.locks_num())
            .finish()
    }
}
