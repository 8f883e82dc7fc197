//! # Cursors
//!
//! A [`Cursor`] is the traversal state over a [`Chain`](crate::Chain).
//!
//! ## States
//! - **Inactive**: no chain, or the chain was exhausted or stopped.
//! - **Active**: points at a viable slot of one of the chain's segments.
//!
//! Beginning a cursor walks the segments in order, skipping empty ones and those
//! lying before `offset`, and positions the cursor on the first viable slot
//! within `offset + limit`. A segment with no viable slot in range is not an
//! error: the cursor simply tries the next one. [`Cursor::advance`] steps within
//! the current segment and moves on in the same way when it runs out. When no
//! segment yields a slot the cursor resets.
//!
//! `offset` and `limit` count raw iterable slots, viable or not, so disjoint
//! ranges tile the chain without overlap.
//!
//! ## Viability
//! Segments were selected by trait or detail set when the chain was built.
//! Everything that can change afterwards is checked per slot:
//! - chunk rows: not stale, live flagmark matches, excluded details absent;
//! - belt slots: see [`Belt::prepare_for_iteration`].
//!
//! ## Access
//! Every step and every lookup reads chunk and belt storage under the
//! mechanism's access guard held shared. Inside a pass the guard is already
//! held by the thread and the request is free.
//!
//! ## Chain users
//! An active cursor counts as one user of its chain. Resetting releases it, and
//! releasing the last user of a chain with no running operatings disposes the
//! chain.

use std::any::TypeId;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::engine::belt::{Belt, PinnedDetails};
use crate::engine::chain::{ChainShared, Segment};
use crate::engine::chunk::Chunk;
use crate::engine::component::{Detail, Trait};
use crate::engine::error::{
    ApparatusError, ApparatusResult, MissingDetailError, MissingTraitError, Outcome, Status,
};
use crate::engine::filter::Filter;
use crate::engine::flags::{Flag, Flagmark};
use crate::engine::lock::SharedAccess;
use crate::engine::machine::Machine;
use crate::engine::mechanism::Mechanism;
use crate::engine::part::{Claims, Part, Parts};
use crate::engine::subject::{SubjectHandle, SubjectPool};
use crate::engine::subjective::{DetailCell, Subjective};
use crate::engine::types::{DetailId, TraitId};


/// Line index of each filter trait in the current chunk, keyed by type.
type Hints = SmallVec<[(TypeId, usize); 8]>;

enum SubIterator {
    None,
    Chunk {
        chunk: Arc<Chunk>,
        index: usize,
        end: usize,
        hints: Hints,
    },
    Belt {
        belt: Arc<Belt>,
        index: usize,
        end: usize,
        subject: SubjectHandle,
        pinned: PinnedDetails,
    },
}

const INACTIVE: ApparatusError = ApparatusError::InvalidState("cursor is not active");

fn chunk_row_viable(chunk: &Chunk, index: usize, filter: &Filter, pool: Option<&SubjectPool>) -> bool {
    let Some(slot) = chunk.slot(index) else { return false };
    if slot.is_stale() || !filter.matches_flagmark(slot.flagmark()) {
        return false;
    }
    match pool {
        Some(pool) => {
            let details = pool
                .info(slot.subject())
                .and_then(|info| info.subjective.as_ref())
                .map(|subjective| subjective.details_mask())
                .unwrap_or_default();
            filter.matches_details(&details)
        }
        None => true,
    }
}

/// Traversal state over a chain.
pub struct Cursor {
    chain: Option<Arc<ChainShared>>,
    retained: bool,
    segment: usize,
    segment_start: usize,
    end: usize,
    sub: SubIterator,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    /// An inactive cursor.
    pub const fn new() -> Self {
        Self {
            chain: None,
            retained: false,
            segment: 0,
            segment_start: 0,
            end: 0,
            sub: SubIterator::None,
        }
    }

    /// Returns `true` while the cursor points at a slot.
    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self.sub, SubIterator::None)
    }

    /// Returns `true` if the cursor walks belts.
    #[inline]
    pub fn is_belt(&self) -> bool {
        matches!(self.sub, SubIterator::Belt { .. })
    }

    /// Raw position of the current slot within the chain.
    pub fn position(&self) -> Option<usize> {
        match &self.sub {
            SubIterator::None => None,
            SubIterator::Chunk { index, .. } | SubIterator::Belt { index, .. } => Some(self.segment_start + index),
        }
    }

    /// Positions the cursor on the first viable slot of `chain` within
    /// `[offset, offset + limit)`. Returns `false` if there is none.
    pub(crate) fn begin(&mut self, chain: &Arc<ChainShared>, offset: usize, limit: usize) -> bool {
        self.reset();
        if chain.is_disposed() {
            return false;
        }
        self.chain = Some(Arc::clone(chain));
        self.end = offset.saturating_add(limit);
        let found = {
            let _access = chain.mechanism.access.shared();
            self.seek(0, 0, offset)
        };
        if found {
            chain.retain_user();
            self.retained = true;
            true
        } else {
            self.chain = None;
            false
        }
    }

    /// Steps to the next viable slot. Resets and returns `false` at the end of
    /// the range or when the chain was asked to stop.
    pub fn advance(&mut self) -> bool {
        let Some(chain) = self.chain.clone() else { return false };
        if !self.is_active() {
            return false;
        }
        if chain.should_stop() {
            self.reset();
            return false;
        }
        let moved = {
            let _access = chain.mechanism.access.shared();
            self.step(&chain) || {
                let next = self.segment + 1;
                let start = self.segment_start + chain.segments[self.segment].iterable_count();
                self.seek(next, start, start)
            }
        };
        if !moved {
            self.reset();
        }
        moved
    }

    /// Returns the cursor to the inactive state, releasing its chain.
    pub fn reset(&mut self) {
        self.sub = SubIterator::None;
        let chain = self.chain.take();
        if std::mem::take(&mut self.retained) {
            if let Some(chain) = chain {
                chain.release_user();
            }
        }
    }

    fn seek(&mut self, mut segment: usize, mut start: usize, position: usize) -> bool {
        let Some(chain) = self.chain.clone() else { return false };
        while segment < chain.segments.len() && start < self.end {
            let count = chain.segments[segment].iterable_count();
            let local_end = count.min(self.end - start);
            let local_begin = position.saturating_sub(start);
            if local_begin < local_end {
                if let Some(sub) = Self::begin_segment(&chain, &chain.segments[segment], local_begin, local_end) {
                    self.segment = segment;
                    self.segment_start = start;
                    self.sub = sub;
                    return true;
                }
            }
            start += count;
            segment += 1;
        }
        self.sub = SubIterator::None;
        false
    }

    fn begin_segment(chain: &ChainShared, segment: &Segment, begin: usize, end: usize) -> Option<SubIterator> {
        let filter = &chain.filter;
        match segment {
            Segment::Chunk(chunk) => {
                let index = Self::next_chunk_row(chain, chunk, begin, end)?;
                let hints = filter
                    .traits()
                    .iter()
                    .filter_map(|id| {
                        let line = chunk.line_index_of(id as TraitId)?;
                        Some((chunk.line_type_id(line)?, line))
                    })
                    .collect();
                Some(SubIterator::Chunk { chunk: Arc::clone(chunk), index, end, hints })
            }
            Segment::Belt(belt) => {
                let (index, subject, pinned) = Self::next_belt_slot(chain, belt, begin, end)?;
                Some(SubIterator::Belt { belt: Arc::clone(belt), index, end, subject, pinned })
            }
        }
    }

    fn next_chunk_row(chain: &ChainShared, chunk: &Chunk, from: usize, end: usize) -> Option<usize> {
        let filter = &chain.filter;
        if filter.excluded_details().is_empty() {
            (from..end).find(|&index| chunk_row_viable(chunk, index, filter, None))
        } else {
            let pool = chain.mechanism.machine.subjects();
            (from..end).find(|&index| chunk_row_viable(chunk, index, filter, Some(&pool)))
        }
    }

    fn next_belt_slot(
        chain: &ChainShared,
        belt: &Belt,
        from: usize,
        end: usize,
    ) -> Option<(usize, SubjectHandle, PinnedDetails)> {
        let pool = chain.mechanism.machine.subjects();
        (from..end).find_map(|index| {
            let pinned = belt.prepare_for_iteration(index, &chain.filter, &pool)?;
            let subject = belt.slot(index)?.subjective().subject();
            Some((index, subject, pinned))
        })
    }

    fn step(&mut self, chain: &ChainShared) -> bool {
        match &mut self.sub {
            SubIterator::None => false,
            SubIterator::Chunk { chunk, index, end, .. } => {
                match Self::next_chunk_row(chain, chunk, *index + 1, *end) {
                    Some(next) => {
                        *index = next;
                        true
                    }
                    None => false,
                }
            }
            SubIterator::Belt { belt, index, end, subject, pinned } => {
                match Self::next_belt_slot(chain, belt, *index + 1, *end) {
                    Some((next, next_subject, next_pinned)) => {
                        *index = next;
                        *subject = next_subject;
                        *pinned = next_pinned;
                        true
                    }
                    None => false,
                }
            }
        }
    }

    fn access(&self) -> Option<SharedAccess<'_>> {
        self.chain.as_ref().map(|chain| chain.mechanism.access.shared())
    }

    fn chain(&self) -> ApparatusResult<&Arc<ChainShared>> {
        self.chain.as_ref().filter(|_| self.is_active()).ok_or(INACTIVE)
    }

    /// The machine of the chain being walked.
    pub fn machine(&self) -> Option<&Arc<Machine>> {
        self.chain.as_ref().map(|chain| &chain.mechanism.machine)
    }

    /// Handle to the mechanism of the chain being walked.
    pub fn mechanism(&self) -> Option<Mechanism> {
        self.chain.as_ref().map(|chain| Mechanism::from_shared(Arc::clone(&chain.mechanism)))
    }

    /// Current subject, or [`SubjectHandle::INVALID`] when inactive.
    pub fn subject(&self) -> SubjectHandle {
        match &self.sub {
            SubIterator::None => SubjectHandle::INVALID,
            SubIterator::Chunk { chunk, index, .. } => {
                let _access = self.access();
                chunk.slot(*index).map_or(SubjectHandle::INVALID, |slot| slot.subject())
            }
            SubIterator::Belt { subject, .. } => *subject,
        }
    }

    /// Chunk and row currently holding the subject's traits.
    fn location(&self) -> Option<(Arc<Chunk>, usize)> {
        match &self.sub {
            SubIterator::None => None,
            SubIterator::Chunk { chunk, index, .. } => Some((Arc::clone(chunk), *index)),
            SubIterator::Belt { subject, .. } => {
                let pool = self.chain.as_ref()?.mechanism.machine.subjects();
                let info = pool.info(*subject)?;
                Some((Arc::clone(info.chunk.as_ref()?), info.slot))
            }
        }
    }

    /// Live flagmark of the current subject.
    pub fn flagmark(&self) -> Flagmark {
        let _access = self.access();
        self.location()
            .and_then(|(chunk, slot)| chunk.slot(slot).map(|slot| slot.flagmark()))
            .unwrap_or(Flagmark::NONE)
    }

    /// Returns `true` if the current subject has `flag`.
    #[inline]
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flagmark().has(flag)
    }

    /// Sets or clears a flag on the current subject. Allowed on solid chains.
    pub fn set_flag(&self, flag: Flag, state: bool) -> Outcome {
        if flag.is_engine_managed() {
            return Err(ApparatusError::InvalidArgument("flag is managed by the engine"));
        }
        let _access = self.access();
        let (chunk, slot) = self.location().ok_or(INACTIVE)?;
        let slot = chunk.slot(slot).ok_or(INACTIVE)?;
        Ok(if slot.set_flag(flag, state) == state { Status::Noop } else { Status::Success })
    }

    /// Pointer to trait `T` of the current subject.
    pub fn trait_ptr<T: Trait>(&self) -> Option<NonNull<T>> {
        let _access = self.access();
        let ptr = match &self.sub {
            SubIterator::None => None,
            SubIterator::Chunk { chunk, index, hints, .. } => {
                let type_id = TypeId::of::<T>();
                let line = hints
                    .iter()
                    .find(|(hinted, _)| *hinted == type_id)
                    .map(|&(_, line)| line)
                    .or_else(|| chunk.line_index_by_type(type_id))?;
                // SAFETY: only a pointer is produced.
                unsafe { chunk.line_ptr::<T>(line, *index) }
            }
            SubIterator::Belt { .. } => {
                let (chunk, slot) = self.location()?;
                // SAFETY: only a pointer is produced; chunks live as long as
                // their mechanism.
                unsafe { chunk.trait_ptr::<T>(slot) }
            }
        };
        ptr.and_then(NonNull::new)
    }

    /// Copy of trait `T` of the current subject.
    pub fn get_trait<T: Trait>(&self) -> ApparatusResult<T> {
        Ok(self.trait_ref::<T>()?.clone())
    }

    /// Shared reference to trait `T` of the current subject.
    pub fn trait_ref<T: Trait>(&self) -> ApparatusResult<&T> {
        self.chain()?;
        let ptr = self.trait_ptr::<T>().ok_or_else(missing_trait::<T>)?;
        // SAFETY: the row is not moved while the cursor points at it.
        Ok(unsafe { &*ptr.as_ptr() })
    }

    /// Exclusive reference to trait `T` of the current subject.
    pub fn trait_mut<T: Trait>(&mut self) -> ApparatusResult<&mut T> {
        self.chain()?;
        let ptr = self.trait_ptr::<T>().ok_or_else(missing_trait::<T>)?;
        // SAFETY: as above, and `&mut self` excludes other references handed
        // out by this cursor.
        Ok(unsafe { &mut *ptr.as_ptr() })
    }

    /// Writes trait `T` of the current subject.
    ///
    /// Writes in place when the subject carries `T`. Otherwise the subject
    /// migrates, which requires a liquid chain; the moved subject is not
    /// visited again by this chain.
    pub fn set_trait<T: Trait>(&mut self, value: T) -> Outcome {
        let chain = Arc::clone(self.chain()?);
        if let Ok(slot) = self.trait_mut::<T>() {
            *slot = value;
            return Ok(Status::Success);
        }
        if chain.solid {
            return Err(ApparatusError::InvalidState("cannot add a trait while the chain is solid"));
        }
        Mechanism::from_shared(Arc::clone(&chain.mechanism)).set_trait(self.subject(), value)
    }

    /// Subjective of the current subject.
    pub fn subjective(&self) -> Option<Arc<Subjective>> {
        let _access = self.access();
        match &self.sub {
            SubIterator::None => None,
            SubIterator::Chunk { .. } => {
                let pool = self.chain.as_ref()?.mechanism.machine.subjects();
                pool.info(self.subject())?.subjective.clone()
            }
            SubIterator::Belt { belt, index, .. } => belt.slot(*index).map(|slot| Arc::clone(slot.subjective())),
        }
    }

    /// First pinned cell of `class`. Only belt cursors pin cells.
    pub fn pinned_cell(&self, class: DetailId) -> Option<&Arc<DetailCell>> {
        match &self.sub {
            SubIterator::Belt { pinned, .. } => pinned
                .iter()
                .find(|(pinned_class, _)| *pinned_class == class)
                .and_then(|(_, line)| line.first()),
            _ => None,
        }
    }

    fn detail_cell<D: Detail>(&self) -> ApparatusResult<Arc<DetailCell>> {
        let class = self.machine().ok_or(INACTIVE)?.detail_id_of::<D>()?;
        if let Some(cell) = self.pinned_cell(class) {
            return Ok(Arc::clone(cell));
        }
        self.subjective()
            .and_then(|subjective| subjective.find(class))
            .ok_or_else(|| MissingDetailError { detail_name: std::any::type_name::<D>() }.into())
    }

    /// Runs `f` on the current subject's first detail viewable as `D`.
    pub fn with_detail<D: Detail, R>(&self, f: impl FnOnce(&D) -> R) -> ApparatusResult<R> {
        let cell = self.detail_cell::<D>()?;
        let detail = cell.read::<D>().ok_or_else(missing_detail::<D>)?;
        Ok(f(&detail))
    }

    /// Runs `f` on the current subject's first detail viewable as `D`, mutably.
    pub fn with_detail_mut<D: Detail, R>(&self, f: impl FnOnce(&mut D) -> R) -> ApparatusResult<R> {
        let cell = self.detail_cell::<D>()?;
        let mut detail = cell.write::<D>().ok_or_else(missing_detail::<D>)?;
        Ok(f(&mut detail))
    }

    /// Resolves a single part for the current slot.
    pub fn part<P: Part>(&mut self) -> ApparatusResult<P::Output<'_>> {
        self.chain()?;
        P::claim(&mut Claims::new())?;
        // SAFETY: a single part cannot alias itself, and `&mut self` is held
        // for the output's lifetime.
        unsafe { P::fetch(&*self) }
    }

    /// Resolves a tuple of parts for the current slot.
    pub fn parts<P: Parts>(&mut self) -> ApparatusResult<P::Output<'_>> {
        self.chain()?;
        P::claim_all()?;
        // SAFETY: the claims were validated, and `&mut self` is held for the
        // outputs' lifetime.
        unsafe { P::fetch_all(&*self) }
    }
}

fn missing_trait<T>() -> ApparatusError {
    MissingTraitError { trait_name: std::any::type_name::<T>() }.into()
}

fn missing_detail<D>() -> ApparatusError {
    MissingDetailError { detail_name: std::any::type_name::<D>() }.into()
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.reset();
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("active", &self.is_active())
            .field("belt", &self.is_belt())
            .field("segment", &self.segment)
            .field("position", &self.position())
            .field("subject", &self.subject())
            .finish()
    }
}
