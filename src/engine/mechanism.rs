//! Mechanism: the unit of isolation of the runtime.
//!
//! A mechanism owns:
//!
//! * the chunks holding its subjects' traits, one per distinct traitmark,
//! * the belts holding references to its subjectives, one per detailmark,
//! * filter → chunk/belt caches used by [`Mechanism::enchain`],
//! * the MPSC queue of [deferred changes](crate::engine::deferred),
//! * the [`AccessGuard`] and [`LocksCount`] coordinating structural changes
//!   with running chains.
//!
//! Subject records themselves live in the [`Machine`]'s pool, shared by every
//! mechanism built on the same machine; each record remembers its owner.
//!
//! ## Concurrency model
//!
//! Structural state sits in an `UnsafeCell`. Safety is enforced by *API
//! discipline*:
//!
//! * every structural operation holds the access guard exclusively and then the
//!   machine's pool write lock, always in that order;
//! * lookups hold the access guard shared;
//! * internal helpers receive `&mut MechanismData` from their public caller and
//!   never re-acquire it.
//!
//! Every check of the solid/liquid state happens after exclusive access is
//! acquired, so a chain enchained while an operation waited is always seen.
//!
//! While a **solid** chain exists, structural operations fail with
//! `InvalidState`; in-place trait writes and flag changes remain allowed, and
//! anything else goes through the `*_deferred` variants. While a **liquid**
//! chain exists, structural operations run immediately but removals from the
//! chain's chunks and belts are postponed until it is disposed.
//!
//! A pass over a chain holds the access guard itself (exclusively for liquid
//! chains, shared for solid ones), so structural operations from other threads
//! wait for a liquid pass to end, and operations needing exclusive access are
//! refused from inside a solid pass.
//!
//! ## Network ids
//!
//! Network ids are unique within a mechanism and indexed for
//! [`Mechanism::find_subject_by_network_id`]. The index sits behind its own
//! mutex, taken after the machine's pool lock.
//!
//! ## Migration
//!
//! A subject whose trait set changes moves to the chunk of its new traitmark.
//! Out of an unlocked chunk the row is moved (`swap_traits`); out of a locked
//! chunk it is copied and the old row is released (`overwrite_traits`), so
//! cursors never see rows shift under them.

use std::any::type_name;
use std::cell::UnsafeCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use tracing::{debug, trace, warn};

use crate::engine::belt::Belt;
use crate::engine::chain::{Chain, Segment};
use crate::engine::chunk::{Chunk, ChunkSlot};
use crate::engine::cursor::Cursor;
use crate::engine::component::{Detail, IntoTraitBundle, Trait, TraitBundle};
use crate::engine::config::MechanismConfig;
use crate::engine::deferred::Deferred;
use crate::engine::error::{
    ApparatusError, ApparatusResult, MissingDetailError, MissingTraitError, Outcome,
    StaleSubjectError, Status,
};
use crate::engine::filter::{Filter, Fingerprint};
use crate::engine::flags::{Flag, Flagmark};
use crate::engine::lock::{AccessGuard, ExclusiveAccess, LocksCount, SharedAccess};
use crate::engine::machine::Machine;
use crate::engine::paradigm::Paradigm;
use crate::engine::record::SubjectRecord;
use crate::engine::subject::{SubjectHandle, SubjectInfo, SubjectPool, SubjectRef};
use crate::engine::subjective::{DetailCell, Subjective};
use crate::engine::types::{
    BeltId, BitMask, ChunkId, DetailId, Detailmark, MechanismId, TraitId, Traitmark,
};


#[derive(Default)]
pub(crate) struct MechanismData {
    chunks: Vec<Arc<Chunk>>,
    chunks_by_traitmark: HashMap<Traitmark, usize>,
    belts: Vec<Arc<Belt>>,
    belts_by_detailmark: HashMap<Detailmark, usize>,
    chunk_cache: HashMap<Filter, Vec<usize>>,
    belt_cache: HashMap<Filter, Vec<usize>>,
    halted: HashSet<SubjectHandle>,
}

/// State shared between a mechanism handle and the chains enchained from it.
pub(crate) struct MechanismShared {
    pub(crate) id: MechanismId,
    pub(crate) machine: Arc<Machine>,
    pub(crate) config: MechanismConfig,
    pub(crate) access: AccessGuard,
    pub(crate) locks: LocksCount,
    data: UnsafeCell<MechanismData>,
    subjects: AtomicUsize,
    network_ids: Mutex<HashMap<u64, SubjectHandle>>,
    deferreds_tx: Sender<Deferred>,
    deferreds_rx: Receiver<Deferred>,
}

// SAFETY: `data` is only reached through `data_mut` (exclusive access held) or
// `data` (shared access held).
unsafe impl Sync for MechanismShared {}

const SOLID: ApparatusError = ApparatusError::InvalidState("structural change while the mechanism is solid");
const FOREIGN: ApparatusError = ApparatusError::InvalidArgument("subject belongs to another mechanism");
const UNPLACED: ApparatusError = ApparatusError::NotAvailable("subject is not placed yet");
const ENGINE_FLAG: ApparatusError = ApparatusError::InvalidArgument("flag is managed by the engine");
const NETWORK_ID_TAKEN: ApparatusError = ApparatusError::InvalidState("network id is owned by another subject");

impl MechanismShared {
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn data_mut(&self, _access: &ExclusiveAccess<'_>) -> &mut MechanismData {
        // SAFETY: exclusive access is held and public callers take this
        // reference once per operation.
        unsafe { &mut *self.data.get() }
    }

    #[inline]
    fn data(&self, _access: &SharedAccess<'_>) -> &MechanismData {
        // SAFETY: shared access excludes structural mutation on other threads.
        unsafe { &*self.data.get() }
    }

    #[inline]
    fn ensure_liquid(&self, paradigm: Paradigm) -> ApparatusResult<()> {
        paradigm.assess(!self.locks.is_solid(), || SOLID)
    }

    fn locate<'p>(&self, pool: &'p SubjectPool, handle: SubjectHandle) -> ApparatusResult<&'p SubjectInfo> {
        let info = pool.info(handle).ok_or(StaleSubjectError { subject: handle })?;
        if info.mechanism != self.id {
            return Err(FOREIGN);
        }
        Ok(info)
    }

    fn locate_mut<'p>(
        &self,
        pool: &'p mut SubjectPool,
        handle: SubjectHandle,
    ) -> ApparatusResult<&'p mut SubjectInfo> {
        let id = self.id;
        let info = pool.info_mut(handle).ok_or(StaleSubjectError { subject: handle })?;
        if info.mechanism != id {
            return Err(FOREIGN);
        }
        Ok(info)
    }

    fn placed(&self, pool: &SubjectPool, handle: SubjectHandle) -> ApparatusResult<(Arc<Chunk>, usize)> {
        let info = self.locate(pool, handle)?;
        let chunk = info.chunk.clone().ok_or(UNPLACED)?;
        Ok((chunk, info.slot))
    }

    fn with_slot<R>(&self, handle: SubjectHandle, f: impl FnOnce(&ChunkSlot) -> R) -> ApparatusResult<R> {
        let _access = self.access.shared();
        let (chunk, slot) = self.placed(&self.machine.subjects(), handle)?;
        chunk
            .slot(slot)
            .map(f)
            .ok_or(ApparatusError::SanityCheckFailed("subject points past its chunk"))
    }

    fn chunk_for(&self, data: &mut MechanismData, traitmark: &Traitmark) -> ApparatusResult<Arc<Chunk>> {
        if let Some(&index) = data.chunks_by_traitmark.get(traitmark) {
            return Ok(Arc::clone(&data.chunks[index]));
        }
        let index = data.chunks.len();
        let chunk = Arc::new(Chunk::new(
            index as ChunkId,
            self.id,
            traitmark.clone(),
            &self.machine,
            self.config.line_block_capacity,
        )?);
        for (filter, indices) in data.chunk_cache.iter_mut() {
            if chunk.matches(filter) {
                indices.push(index);
            }
        }
        data.chunks.push(Arc::clone(&chunk));
        data.chunks_by_traitmark.insert(traitmark.clone(), index);
        debug!(mechanism = %self.config.name, chunk = index, traits = ?traitmark.traits(), "created chunk");
        Ok(chunk)
    }

    /// The most specific belt accepting `details`, created if none does.
    fn belt_for(&self, data: &mut MechanismData, details: &BitMask) -> Arc<Belt> {
        let detailmark = Detailmark::from_mask(details.clone());
        if let Some(&index) = data.belts_by_detailmark.get(&detailmark) {
            return Arc::clone(&data.belts[index]);
        }
        let best = data
            .belts
            .iter()
            .filter(|belt| belt.accepts(details))
            .min_by_key(|belt| belt.detailmark().mask().difference_count(details));
        if let Some(belt) = best {
            return Arc::clone(belt);
        }
        let index = data.belts.len();
        let belt = Arc::new(Belt::new(
            index as BeltId,
            self.id,
            detailmark.clone(),
            self.config.line_block_capacity,
        ));
        for (filter, indices) in data.belt_cache.iter_mut() {
            if belt.matches(filter) {
                indices.push(index);
            }
        }
        data.belts.push(Arc::clone(&belt));
        debug!(mechanism = %self.config.name, belt = index, details = ?detailmark.details(), "created belt");
        data.belts_by_detailmark.insert(detailmark, index);
        belt
    }

    fn place(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
        flagmark: Flagmark,
        mut bundle: TraitBundle,
    ) -> ApparatusResult<()> {
        self.locate(pool, handle)?;
        let traitmark = Traitmark::from_mask(bundle.mask().clone());
        let chunk = self.chunk_for(data, &traitmark)?;
        let slot = chunk.reserve_subject_slot(access, handle, flagmark, &mut bundle)?;
        let info = self.locate_mut(pool, handle)?;
        info.chunk = Some(chunk);
        info.slot = slot;
        if !flagmark.has(Flag::Booted) {
            data.halted.insert(handle);
        }
        Ok(())
    }

    fn migrate(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
        traitmark: Traitmark,
    ) -> ApparatusResult<(Arc<Chunk>, usize)> {
        let (source, slot) = self.placed(pool, handle)?;
        if *source.traitmark() == traitmark {
            return Ok((source, slot));
        }
        let target = self.chunk_for(data, &traitmark)?;
        let index = if source.is_locked() {
            let index = source.overwrite_traits(access, slot, &target, handle)?;
            source.release_slot(access, slot, false, pool)?;
            index
        } else {
            source.swap_traits(access, slot, &target, pool)?
        };
        let info = self.locate_mut(pool, handle)?;
        info.chunk = Some(Arc::clone(&target));
        info.slot = index;
        Ok((target, index))
    }

    /// Makes sure the subject carries `trait_id`. Returns its location and
    /// whether the trait had to be added.
    fn ensure_trait(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
        trait_id: TraitId,
        paradigm: Paradigm,
    ) -> ApparatusResult<(Arc<Chunk>, usize, bool)> {
        let (chunk, slot) = self.placed(pool, handle)?;
        if chunk.traitmark().contains(trait_id) {
            return Ok((chunk, slot, false));
        }
        self.ensure_liquid(paradigm)?;
        let traitmark = chunk.traitmark().with(trait_id);
        let (chunk, slot) = self.migrate(access, data, pool, handle, traitmark)?;
        Ok((chunk, slot, true))
    }

    fn remove_trait_in(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
        trait_id: TraitId,
        paradigm: Paradigm,
    ) -> Outcome {
        let (chunk, _) = self.placed(pool, handle)?;
        if !chunk.traitmark().contains(trait_id) {
            let trait_name = self.machine.trait_desc(trait_id).map_or("<unregistered>", |desc| desc.name);
            return Err(MissingTraitError { trait_name }.into());
        }
        self.ensure_liquid(paradigm)?;
        self.migrate(access, data, pool, handle, chunk.traitmark().without(trait_id))?;
        Ok(Status::Success)
    }

    fn remove_all_traits_in(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
        paradigm: Paradigm,
    ) -> Outcome {
        let (chunk, _) = self.placed(pool, handle)?;
        if chunk.traitmark().is_empty() {
            return Ok(Status::Noop);
        }
        self.ensure_liquid(paradigm)?;
        self.migrate(access, data, pool, handle, Traitmark::default())?;
        Ok(Status::Success)
    }

    fn remove_subject(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
    ) -> ApparatusResult<()> {
        let info = self.locate(pool, handle)?;
        let (chunk, slot, subjective) = (info.chunk.clone(), info.slot, info.subjective.clone());
        if let Some(network_id) = info.network_id {
            let mut network_ids = self.network_ids.lock();
            if network_ids.get(&network_id) == Some(&handle) {
                network_ids.remove(&network_id);
            }
        }
        data.halted.remove(&handle);
        if let Some((belt, index)) = subjective.as_ref().and_then(|subjective| subjective.placement()) {
            if let Some(belt) = data.belts.get(belt as usize) {
                belt.set_removed(access, index)?;
            }
        }
        if let Some(chunk) = chunk {
            chunk.release_slot(access, slot, true, pool)?;
        }
        pool.release(handle);
        self.subjects.fetch_sub(1, Ordering::Relaxed);
        Ok(())
    }

    fn attach_detail(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        handle: SubjectHandle,
        detail: Box<dyn Detail>,
    ) -> ApparatusResult<()> {
        let class = self
            .machine
            .detail_id_of_type((*detail).as_any().type_id(), (*detail).type_name())?;
        let (class_mask, bases) = {
            let details = self.machine.details();
            let desc = details.desc(class).ok_or(ApparatusError::Missing("detail descriptor"))?;
            (desc.class_mask.clone(), Arc::clone(&desc.bases))
        };
        let info = self.locate_mut(pool, handle)?;
        let subjective = Arc::clone(info.subjective.get_or_insert_with(|| {
            let subjective = Subjective::new();
            subjective.set_subject(handle);
            subjective
        }));
        subjective.push(Arc::new(DetailCell::new(class, class_mask, bases, detail)));
        self.place_subjective(access, data, &subjective)
    }

    /// Keeps the subjective in a belt accepting its live detail set.
    fn place_subjective(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        subjective: &Arc<Subjective>,
    ) -> ApparatusResult<()> {
        let details = subjective.details_mask();
        let placement = subjective.placement();
        if let Some((belt, _)) = placement {
            let accepted = data.belts.get(belt as usize).map_or(false, |belt| belt.accepts(&details));
            if accepted && !details.is_empty() {
                return Ok(());
            }
        }
        if let Some((belt, index)) = placement {
            data.belts
                .get(belt as usize)
                .ok_or(ApparatusError::SanityCheckFailed("subjective placed in an unknown belt"))?
                .set_removed(access, index)?;
        }
        if !details.is_empty() {
            self.belt_for(data, &details).add(access, Arc::clone(subjective));
        }
        Ok(())
    }

    fn defer(&self, deferred: Deferred) -> Outcome {
        self.deferreds_tx
            .send(deferred)
            .map_err(|_| ApparatusError::NotAvailable("deferred queue is closed"))?;
        Ok(Status::Deferred)
    }

    fn check_owned(&self, handle: SubjectHandle) -> ApparatusResult<()> {
        self.locate(&self.machine.subjects(), handle).map(|_| ())
    }

    fn spawn(
        &self,
        bundle: TraitBundle,
        flagmark: Flagmark,
        details: Vec<Box<dyn Detail>>,
    ) -> ApparatusResult<SubjectHandle> {
        check_user_flags(flagmark)?;
        let access = self.access.exclusive()?;
        self.ensure_liquid(Paradigm::Safe)?;
        let data = self.data_mut(&access);
        let mut pool = self.machine.subjects_mut();
        let handle = pool.allocate(self.id)?;
        self.subjects.fetch_add(1, Ordering::Relaxed);

        let mut placed = self.place(&access, data, &mut pool, handle, flagmark, bundle);
        for detail in details {
            if placed.is_err() {
                break;
            }
            placed = self.attach_detail(&access, data, &mut pool, handle, detail);
        }
        if let Err(error) = placed {
            if let Err(cleanup) = self.remove_subject(&access, data, &mut pool, handle) {
                debug!(%cleanup, "failed to discard a partially spawned subject");
            }
            return Err(error);
        }
        Ok(handle)
    }

    fn boot_all(&self) -> Outcome {
        let access = self.access.exclusive()?;
        if self.locks.is_solid() {
            return Ok(Status::Noop);
        }
        let data = self.data_mut(&access);
        if data.halted.is_empty() {
            return Ok(Status::Noop);
        }
        let halted = mem::take(&mut data.halted);
        let pool = self.machine.subjects();
        let mut booted = 0usize;
        for handle in halted {
            let Some(info) = pool.info(handle) else { continue };
            let slot = info.chunk.as_ref().and_then(|chunk| chunk.slot(info.slot));
            if let Some(slot) = slot {
                if !slot.set_flag(Flag::Booted, true) {
                    booted += 1;
                }
            }
        }
        trace!(mechanism = %self.config.name, booted, "booted halted subjects");
        Ok(if booted > 0 { Status::Success } else { Status::Noop })
    }

    fn enchain(self: &Arc<Self>, filter: Filter, solid: bool) -> ApparatusResult<Chain> {
        let access = self.access.exclusive()?;
        if self.config.boot_on_enchain && filter.flagmark().has(Flag::Booted) {
            self.boot_all()?;
        }
        if solid {
            self.locks.solidify()?;
        } else {
            self.locks.liquify()?;
        }
        let data = self.data_mut(&access);
        let segments: Vec<Segment> = if filter.has_details() {
            if !data.belt_cache.contains_key(&filter) {
                let matching = (0..data.belts.len()).filter(|&i| data.belts[i].matches(&filter)).collect();
                data.belt_cache.insert(filter.clone(), matching);
            }
            data.belt_cache[&filter]
                .iter()
                .map(|&index| {
                    let belt = Arc::clone(&data.belts[index]);
                    belt.lock();
                    Segment::Belt(belt)
                })
                .collect()
        } else {
            if !data.chunk_cache.contains_key(&filter) {
                let matching = (0..data.chunks.len()).filter(|&i| data.chunks[i].matches(&filter)).collect();
                data.chunk_cache.insert(filter.clone(), matching);
            }
            data.chunk_cache[&filter]
                .iter()
                .map(|&index| {
                    let chunk = Arc::clone(&data.chunks[index]);
                    chunk.lock(solid);
                    Segment::Chunk(chunk)
                })
                .collect()
        };
        drop(access);
        debug!(mechanism = %self.config.name, segments = segments.len(), solid, "enchained");
        Ok(Chain::new(Arc::clone(self), filter, solid, segments))
    }

    fn apply(
        &self,
        access: &ExclusiveAccess<'_>,
        data: &mut MechanismData,
        pool: &mut SubjectPool,
        deferred: Deferred,
    ) -> Outcome {
        match deferred {
            Deferred::Spawn { subject, bundle, flagmark } => {
                if !pool.is_valid(subject) {
                    return Ok(Status::Noop);
                }
                self.place(access, data, pool, subject, flagmark, bundle)?;
                Ok(Status::Success)
            }
            Deferred::Despawn { subject } => {
                if !pool.is_valid(subject) {
                    return Ok(Status::Noop);
                }
                self.remove_subject(access, data, pool, subject)?;
                Ok(Status::Success)
            }
            Deferred::SetTrait { subject, trait_id, value } => {
                let (chunk, slot, _) =
                    self.ensure_trait(access, data, pool, subject, trait_id, Paradigm::Polite)?;
                chunk.write_boxed(access, slot, trait_id, value)?;
                Ok(Status::Success)
            }
            Deferred::ObtainTrait { subject, trait_id } => {
                let (_, _, added) =
                    self.ensure_trait(access, data, pool, subject, trait_id, Paradigm::Polite)?;
                Ok(if added { Status::Success } else { Status::Noop })
            }
            Deferred::RemoveTrait { subject, trait_id } => {
                self.remove_trait_in(access, data, pool, subject, trait_id, Paradigm::Polite)
            }
            Deferred::RemoveAllTraits { subject } => {
                self.remove_all_traits_in(access, data, pool, subject, Paradigm::Polite)
            }
        }
    }

    fn apply_deferreds(&self) -> Outcome {
        let access = self.access.exclusive()?;
        if self.locks.is_solid() {
            return Err(ApparatusError::InvalidState("cannot apply deferreds while solid"));
        }
        if self.deferreds_rx.is_empty() {
            return Ok(Status::Noop);
        }
        let data = self.data_mut(&access);
        let mut pool = self.machine.subjects_mut();
        let mut applied = 0usize;
        let mut failure = None;
        for deferred in self.deferreds_rx.try_iter() {
            let operation = deferred.name();
            match Paradigm::Polite.settle(operation, self.apply(&access, data, &mut pool, deferred)) {
                Ok(Status::Noop) => {}
                Ok(_) => applied += 1,
                Err(error) => {
                    warn!(operation, %error, "deferred change failed");
                    failure.get_or_insert(error);
                }
            }
        }
        drop(pool);
        debug!(mechanism = %self.config.name, applied, "applied deferreds");
        match failure {
            Some(error) => Err(error),
            None if applied > 0 => Ok(Status::Success),
            None => Ok(Status::Noop),
        }
    }
}

impl Drop for MechanismShared {
    fn drop(&mut self) {
        let mut pool = self.machine.subjects_mut();
        let owned = pool.owned_by(self.id);
        for &handle in &owned {
            pool.release(handle);
        }
        trace!(mechanism = %self.config.name, released = owned.len(), "mechanism dropped");
    }
}

fn check_user_flags(flagmark: Flagmark) -> ApparatusResult<()> {
    if flagmark.intersects(Flagmark::STALE | Flagmark::DEFERRED_DESPAWN) {
        return Err(ENGINE_FLAG);
    }
    Ok(())
}

fn missing_trait<T>() -> ApparatusError {
    MissingTraitError { trait_name: type_name::<T>() }.into()
}

fn missing_detail<D>() -> ApparatusError {
    MissingDetailError { detail_name: type_name::<D>() }.into()
}

/// A registry of subjects, their storage and the chains iterating them.
///
/// Cloning a `Mechanism` yields another handle to the same registry.
///
/// # Example
/// ```
/// use apparatus::prelude::*;
///
/// #[derive(Clone, Copy, Default, Debug, PartialEq)]
/// struct Position { x: f32, y: f32 }
/// impl Trait for Position {}
///
/// let machine = Machine::new();
/// let mechanism = Mechanism::new(&machine);
/// let subject = mechanism.spawn_subject((Position { x: 0.0, y: 0.0 },)).unwrap();
/// mechanism.set_trait(subject, Position { x: 1.0, y: 1.0 }).unwrap();
/// assert_eq!(mechanism.get_trait::<Position>(subject).unwrap().x, 1.0);
/// ```
#[derive(Clone)]
pub struct Mechanism {
    shared: Arc<MechanismShared>,
}

impl Mechanism {
    /// Creates a mechanism on `machine` with the default configuration.
    pub fn new(machine: &Arc<Machine>) -> Self {
        Self::with_config(machine, MechanismConfig::default())
    }

    /// Creates a mechanism on `machine` with `config`.
    pub fn with_config(machine: &Arc<Machine>, config: MechanismConfig) -> Self {
        let (deferreds_tx, deferreds_rx) = crossbeam_channel::unbounded();
        let id = machine.next_mechanism_id();
        debug!(mechanism = %config.name, id, "created mechanism");
        Self {
            shared: Arc::new(MechanismShared {
                id,
                machine: Arc::clone(machine),
                config,
                access: AccessGuard::new(),
                locks: LocksCount::new(),
                data: UnsafeCell::new(MechanismData::default()),
                subjects: AtomicUsize::new(0),
                network_ids: Mutex::new(HashMap::new()),
                deferreds_tx,
                deferreds_rx,
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<MechanismShared>) -> Self {
        Self { shared }
    }

    /// Mechanism id within its machine.
    #[inline]
    pub fn id(&self) -> MechanismId {
        self.shared.id
    }

    /// Configured name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Configuration the mechanism was built with.
    #[inline]
    pub fn config(&self) -> &MechanismConfig {
        &self.shared.config
    }

    /// The machine this mechanism registers ids and subjects with.
    #[inline]
    pub fn machine(&self) -> &Arc<Machine> {
        &self.shared.machine
    }

    // ---------------------------------------------------------------------
    // Subjects
    // ---------------------------------------------------------------------

    /// Spawns a subject carrying `traits` (a tuple of traits or a
    /// [`TraitBundle`]). The subject starts halted: it is not `Booted` until
    /// [`Mechanism::boot_all`] runs.
    pub fn spawn_subject<B: IntoTraitBundle>(&self, traits: B) -> ApparatusResult<SubjectHandle> {
        self.spawn_subject_with_flags(traits, Flagmark::NONE)
    }

    /// Spawns a subject with initial flags. Engine-managed flags are rejected.
    pub fn spawn_subject_with_flags<B: IntoTraitBundle>(
        &self,
        traits: B,
        flagmark: Flagmark,
    ) -> ApparatusResult<SubjectHandle> {
        let bundle = traits.into_bundle(&self.shared.machine)?;
        self.shared.spawn(bundle, flagmark, Vec::new())
    }

    /// Spawns a subject carrying `traits` and a subjective holding `details`.
    pub fn spawn_subjective<B: IntoTraitBundle>(
        &self,
        traits: B,
        details: Vec<Box<dyn Detail>>,
    ) -> ApparatusResult<SubjectHandle> {
        let bundle = traits.into_bundle(&self.shared.machine)?;
        self.shared.spawn(bundle, Flagmark::NONE, details)
    }

    /// Allocates a subject now and places it on the next
    /// [`Mechanism::apply_deferreds`]. Allowed while solid.
    pub fn spawn_subject_deferred<B: IntoTraitBundle>(&self, traits: B) -> ApparatusResult<SubjectHandle> {
        let bundle = traits.into_bundle(&self.shared.machine)?;
        let subject = self.shared.machine.subjects_mut().allocate(self.shared.id)?;
        self.shared.subjects.fetch_add(1, Ordering::Relaxed);
        self.shared.defer(Deferred::Spawn { subject, bundle, flagmark: Flagmark::NONE })?;
        Ok(subject)
    }

    /// Copies a subject's traits and flags into a new subject. Details and the
    /// network id are not copied.
    pub fn clone_subject(&self, handle: SubjectHandle) -> ApparatusResult<SubjectHandle> {
        let shared = &self.shared;
        let access = shared.access.exclusive()?;
        shared.ensure_liquid(Paradigm::Safe)?;
        let data = shared.data_mut(&access);
        let mut pool = shared.machine.subjects_mut();
        let (chunk, slot) = shared.placed(&pool, handle)?;
        let clone = pool.allocate(shared.id)?;
        let index = match chunk.clone_subject_at(&access, slot, clone) {
            Ok(index) => index,
            Err(error) => {
                pool.release(clone);
                return Err(error);
            }
        };
        shared.subjects.fetch_add(1, Ordering::Relaxed);
        let booted = chunk.slot(index).map_or(false, |slot| slot.flagmark().has(Flag::Booted));
        let info = shared.locate_mut(&mut pool, clone)?;
        info.chunk = Some(chunk);
        info.slot = index;
        if !booted {
            data.halted.insert(clone);
        }
        Ok(clone)
    }

    /// Despawns a subject. Despawning a stale handle is a `Noop`.
    pub fn despawn(&self, handle: SubjectHandle) -> Outcome {
        self.despawn_with(handle, Paradigm::Safe)
    }

    /// [`Mechanism::despawn`] under an explicit paradigm.
    pub fn despawn_with(&self, handle: SubjectHandle, paradigm: Paradigm) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let access = shared.access.exclusive()?;
            shared.ensure_liquid(paradigm)?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            if !pool.is_valid(handle) {
                return Ok(Status::Noop);
            }
            shared.remove_subject(&access, data, &mut pool, handle)?;
            Ok(Status::Success)
        })();
        paradigm.settle("despawn", outcome)
    }

    /// Marks the subject `DeferredDespawn` and queues its removal. A second
    /// request before the queue is applied is a `Noop`.
    pub fn despawn_deferred(&self, handle: SubjectHandle) -> Outcome {
        let already = {
            let _access = self.shared.access.shared();
            let pool = self.shared.machine.subjects();
            let info = self.shared.locate(&pool, handle)?;
            info.chunk
                .as_ref()
                .and_then(|chunk| chunk.slot(info.slot))
                .map_or(false, |slot| slot.set_flag(Flag::DeferredDespawn, true))
        };
        if already {
            return Ok(Status::Noop);
        }
        self.shared.defer(Deferred::Despawn { subject: handle })
    }

    /// Detached copy of a subject's traits and user-level flags.
    pub fn record(&self, handle: SubjectHandle) -> ApparatusResult<SubjectRecord> {
        let _access = self.shared.access.shared();
        let (chunk, slot) = self.shared.placed(&self.shared.machine.subjects(), handle)?;
        chunk.record_row(slot)
    }

    /// Spawns a subject carrying a copy of `record`.
    pub fn spawn_subject_from_record(&self, record: &SubjectRecord) -> ApparatusResult<SubjectHandle> {
        self.shared.spawn(record.to_bundle(), record.flagmark(), Vec::new())
    }

    /// Like [`Mechanism::spawn_subject_deferred`], taking the traits and flags
    /// from `record`.
    pub fn spawn_subject_deferred_from_record(&self, record: &SubjectRecord) -> ApparatusResult<SubjectHandle> {
        let subject = self.shared.machine.subjects_mut().allocate(self.shared.id)?;
        self.shared.subjects.fetch_add(1, Ordering::Relaxed);
        self.shared.defer(Deferred::Spawn { subject, bundle: record.to_bundle(), flagmark: record.flagmark() })?;
        Ok(subject)
    }

    /// Returns `true` if `handle` is a live subject of this mechanism.
    pub fn is_valid(&self, handle: SubjectHandle) -> bool {
        self.shared
            .machine
            .subjects()
            .info(handle)
            .map_or(false, |info| info.mechanism == self.shared.id)
    }

    /// Borrowed convenience view of a subject.
    #[inline]
    pub fn subject(&self, handle: SubjectHandle) -> SubjectRef<'_> {
        SubjectRef::new(self, handle)
    }

    /// Live trait, detail and flag sets of a subject.
    pub fn fingerprint(&self, handle: SubjectHandle) -> ApparatusResult<Fingerprint> {
        let _access = self.shared.access.shared();
        let pool = self.shared.machine.subjects();
        let info = self.shared.locate(&pool, handle)?;
        let chunk = info.chunk.as_ref().ok_or(UNPLACED)?;
        Ok(Fingerprint {
            traits: chunk.traitmark().mask().clone(),
            details: info
                .subjective
                .as_ref()
                .map(|subjective| subjective.details_mask())
                .unwrap_or_default(),
            flagmark: chunk.slot(info.slot).map_or(Flagmark::NONE, ChunkSlot::flagmark),
        })
    }

    // ---------------------------------------------------------------------
    // Traits
    // ---------------------------------------------------------------------

    /// Writes trait `T`, adding it (and migrating the subject) if missing.
    pub fn set_trait<T: Trait>(&self, handle: SubjectHandle, value: T) -> Outcome {
        self.set_trait_with(handle, value, Paradigm::Safe)
    }

    /// [`Mechanism::set_trait`] under an explicit paradigm.
    pub fn set_trait_with<T: Trait>(&self, handle: SubjectHandle, value: T, paradigm: Paradigm) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let trait_id = shared.machine.trait_id_of::<T>()?;
            let access = shared.access.exclusive()?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            let (chunk, slot, _) = shared.ensure_trait(&access, data, &mut pool, handle, trait_id, paradigm)?;
            drop(pool);
            chunk.write_trait(&access, slot, value)?;
            Ok(Status::Success)
        })();
        paradigm.settle("set_trait", outcome)
    }

    /// Queues a [`Mechanism::set_trait`].
    pub fn set_trait_deferred<T: Trait>(&self, handle: SubjectHandle, value: T) -> Outcome {
        let trait_id = self.shared.machine.trait_id_of::<T>()?;
        self.shared.check_owned(handle)?;
        self.shared.defer(Deferred::SetTrait { subject: handle, trait_id, value: Box::new(value) })
    }

    /// Copy of trait `T`.
    pub fn get_trait<T: Trait>(&self, handle: SubjectHandle) -> ApparatusResult<T> {
        let _access = self.shared.access.shared();
        let (chunk, slot) = self.shared.placed(&self.shared.machine.subjects(), handle)?;
        chunk.get_trait::<T>(slot).ok_or_else(missing_trait::<T>)
    }

    /// Raw pointer to trait `T` in its chunk.
    ///
    /// The pointer stays valid until the subject migrates or is despawned, or
    /// another subject of the same chunk is removed while the chunk is
    /// unlocked. Prefer [`Mechanism::with_trait_mut`].
    pub fn get_trait_ptr<T: Trait>(&self, handle: SubjectHandle) -> ApparatusResult<NonNull<T>> {
        let _access = self.shared.access.shared();
        let (chunk, slot) = self.shared.placed(&self.shared.machine.subjects(), handle)?;
        // SAFETY: only a pointer is produced; dereferencing is the caller's call.
        unsafe { chunk.trait_ptr::<T>(slot) }
            .and_then(NonNull::new)
            .ok_or_else(missing_trait::<T>)
    }

    /// Runs `f` on trait `T` in place, holding exclusive access meanwhile.
    pub fn with_trait_mut<T: Trait, R>(&self, handle: SubjectHandle, f: impl FnOnce(&mut T) -> R) -> ApparatusResult<R> {
        let _access = self.shared.access.exclusive()?;
        let ptr = self.get_trait_ptr::<T>(handle)?;
        // SAFETY: exclusive access keeps every other thread from moving or
        // touching the row until `f` returns.
        Ok(f(unsafe { &mut *ptr.as_ptr() }))
    }

    /// Returns `true` if the subject carries trait `T`.
    pub fn has_trait<T: Trait>(&self, handle: SubjectHandle) -> bool {
        let Some(trait_id) = self.shared.machine.find_trait_id::<T>() else { return false };
        let _access = self.shared.access.shared();
        self.shared
            .placed(&self.shared.machine.subjects(), handle)
            .map_or(false, |(chunk, _)| chunk.traitmark().contains(trait_id))
    }

    /// Adds a default `T` if the subject does not carry it.
    pub fn obtain_trait<T: Trait>(&self, handle: SubjectHandle) -> Outcome {
        self.obtain_trait_with::<T>(handle, Paradigm::Safe)
    }

    /// [`Mechanism::obtain_trait`] under an explicit paradigm.
    pub fn obtain_trait_with<T: Trait>(&self, handle: SubjectHandle, paradigm: Paradigm) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let trait_id = shared.machine.trait_id_of::<T>()?;
            let access = shared.access.exclusive()?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            let (_, _, added) = shared.ensure_trait(&access, data, &mut pool, handle, trait_id, paradigm)?;
            Ok(if added { Status::Success } else { Status::Noop })
        })();
        paradigm.settle("obtain_trait", outcome)
    }

    /// Queues a [`Mechanism::obtain_trait`].
    pub fn obtain_trait_deferred<T: Trait>(&self, handle: SubjectHandle) -> Outcome {
        let trait_id = self.shared.machine.trait_id_of::<T>()?;
        self.shared.check_owned(handle)?;
        self.shared.defer(Deferred::ObtainTrait { subject: handle, trait_id })
    }

    /// Removes trait `T`, migrating the subject.
    pub fn remove_trait<T: Trait>(&self, handle: SubjectHandle) -> Outcome {
        self.remove_trait_with::<T>(handle, Paradigm::Safe)
    }

    /// [`Mechanism::remove_trait`] under an explicit paradigm.
    pub fn remove_trait_with<T: Trait>(&self, handle: SubjectHandle, paradigm: Paradigm) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let trait_id = shared.machine.find_trait_id::<T>().ok_or_else(missing_trait::<T>)?;
            let access = shared.access.exclusive()?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            shared.remove_trait_in(&access, data, &mut pool, handle, trait_id, paradigm)
        })();
        paradigm.settle("remove_trait", outcome)
    }

    /// Queues a [`Mechanism::remove_trait`].
    pub fn remove_trait_deferred<T: Trait>(&self, handle: SubjectHandle) -> Outcome {
        let trait_id = self.shared.machine.trait_id_of::<T>()?;
        self.shared.check_owned(handle)?;
        self.shared.defer(Deferred::RemoveTrait { subject: handle, trait_id })
    }

    /// Removes every trait, moving the subject to the empty chunk.
    pub fn remove_all_traits(&self, handle: SubjectHandle) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let access = shared.access.exclusive()?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            shared.remove_all_traits_in(&access, data, &mut pool, handle, Paradigm::Safe)
        })();
        Paradigm::Safe.settle("remove_all_traits", outcome)
    }

    /// Queues a [`Mechanism::remove_all_traits`].
    pub fn remove_all_traits_deferred(&self, handle: SubjectHandle) -> Outcome {
        self.shared.check_owned(handle)?;
        self.shared.defer(Deferred::RemoveAllTraits { subject: handle })
    }

    // ---------------------------------------------------------------------
    // Flags and network ids
    // ---------------------------------------------------------------------

    /// Sets or clears a flag. `Noop` if it already had that state.
    pub fn set_flag(&self, handle: SubjectHandle, flag: Flag, state: bool) -> Outcome {
        if flag.is_engine_managed() {
            return Err(ENGINE_FLAG);
        }
        self.shared.with_slot(handle, |slot| {
            if slot.set_flag(flag, state) == state {
                Status::Noop
            } else {
                Status::Success
            }
        })
    }

    /// Returns the state of a flag.
    pub fn has_flag(&self, handle: SubjectHandle, flag: Flag) -> ApparatusResult<bool> {
        self.shared.with_slot(handle, |slot| slot.flagmark().has(flag))
    }

    /// Flips a flag and returns its new state.
    pub fn toggle_flag(&self, handle: SubjectHandle, flag: Flag) -> ApparatusResult<bool> {
        if flag.is_engine_managed() {
            return Err(ENGINE_FLAG);
        }
        self.shared.with_slot(handle, |slot| {
            let state = !slot.flagmark().has(flag);
            slot.set_flag(flag, state);
            state
        })
    }

    /// Live flagmark of a subject.
    pub fn flagmark(&self, handle: SubjectHandle) -> ApparatusResult<Flagmark> {
        self.shared.with_slot(handle, ChunkSlot::flagmark)
    }

    /// Network id of a subject, if assigned.
    pub fn network_id(&self, handle: SubjectHandle) -> ApparatusResult<Option<u64>> {
        let pool = self.shared.machine.subjects();
        Ok(self.shared.locate(&pool, handle)?.network_id)
    }

    /// Assigns, changes or clears the network id of a subject. An id owned by
    /// another subject of this mechanism is refused with `InvalidState`.
    pub fn set_network_id(&self, handle: SubjectHandle, network_id: Option<u64>) -> Outcome {
        let shared = &self.shared;
        let mut pool = shared.machine.subjects_mut();
        let current = shared.locate(&pool, handle)?.network_id;
        if current == network_id {
            return Ok(Status::Noop);
        }
        let mut network_ids = shared.network_ids.lock();
        if let Some(id) = network_id {
            if network_ids.get(&id).map_or(false, |&owner| owner != handle) {
                return Err(NETWORK_ID_TAKEN);
            }
        }
        if let Some(id) = current {
            network_ids.remove(&id);
        }
        if let Some(id) = network_id {
            network_ids.insert(id, handle);
        }
        shared.locate_mut(&mut pool, handle)?.network_id = network_id;
        trace!(mechanism = %shared.config.name, ?network_id, "network id assigned");
        Ok(Status::Success)
    }

    /// The live subject holding `network_id`, if any.
    pub fn find_subject_by_network_id(&self, network_id: u64) -> Option<SubjectHandle> {
        let handle = *self.shared.network_ids.lock().get(&network_id)?;
        self.is_valid(handle).then_some(handle)
    }

    // ---------------------------------------------------------------------
    // Details
    // ---------------------------------------------------------------------

    /// Attaches a detail, creating the subject's subjective on first use.
    pub fn add_detail<D: Detail>(&self, handle: SubjectHandle, detail: D) -> Outcome {
        self.add_boxed_detail(handle, Box::new(detail))
    }

    /// Attaches an already boxed detail.
    pub fn add_boxed_detail(&self, handle: SubjectHandle, detail: Box<dyn Detail>) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let access = shared.access.exclusive()?;
            shared.ensure_liquid(Paradigm::Safe)?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            shared.attach_detail(&access, data, &mut pool, handle, detail)?;
            Ok(Status::Success)
        })();
        Paradigm::Safe.settle("add_detail", outcome)
    }

    /// Detaches every detail that is an instance of `D`.
    pub fn remove_details<D: Detail>(&self, handle: SubjectHandle) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let class = shared.machine.detail_id_of::<D>()?;
            let access = shared.access.exclusive()?;
            shared.ensure_liquid(Paradigm::Safe)?;
            let data = shared.data_mut(&access);
            let subjective = {
                let pool = shared.machine.subjects();
                shared.locate(&pool, handle)?.subjective.clone().ok_or_else(missing_detail::<D>)?
            };
            if subjective.remove_class(class) == 0 {
                return Err(missing_detail::<D>());
            }
            shared.place_subjective(&access, data, &subjective)?;
            Ok(Status::Success)
        })();
        Paradigm::Safe.settle("remove_details", outcome)
    }

    /// Enables or disables every detail that is an instance of `D`. Disabled
    /// details are skipped by matching and iteration.
    pub fn set_details_enabled<D: Detail>(&self, handle: SubjectHandle, enabled: bool) -> Outcome {
        let shared = &self.shared;
        let class = shared.machine.detail_id_of::<D>()?;
        let access = shared.access.exclusive()?;
        shared.ensure_liquid(Paradigm::Safe)?;
        let data = shared.data_mut(&access);
        let subjective = self.subjective_of(handle)?.ok_or_else(missing_detail::<D>)?;
        if subjective.set_enabled(class, enabled) == 0 {
            return Ok(Status::Noop);
        }
        shared.place_subjective(&access, data, &subjective)?;
        Ok(Status::Success)
    }

    /// Attaches a default `D` unless an enabled instance of `D` is already
    /// attached, in which case the call returns `Reused`.
    pub fn obtain_detail<D: Detail + Default>(&self, handle: SubjectHandle) -> Outcome {
        let shared = &self.shared;
        let outcome = (|| {
            let class = shared.machine.detail_id_of::<D>()?;
            let access = shared.access.exclusive()?;
            let data = shared.data_mut(&access);
            let mut pool = shared.machine.subjects_mut();
            let attached = shared
                .locate(&pool, handle)?
                .subjective
                .as_ref()
                .map_or(false, |subjective| subjective.find(class).is_some());
            if attached {
                return Ok(Status::Reused);
            }
            shared.ensure_liquid(Paradigm::Safe)?;
            shared.attach_detail(&access, data, &mut pool, handle, Box::new(D::default()))?;
            Ok(Status::Success)
        })();
        Paradigm::Safe.settle("obtain_detail", outcome)
    }

    /// Appends every enabled detail that is an instance of `D` to `out`.
    /// Returns `NoItems` if there is none.
    pub fn collect_details<D: Detail>(&self, handle: SubjectHandle, out: &mut Vec<Arc<DetailCell>>) -> Outcome {
        let class = self.shared.machine.detail_id_of::<D>()?;
        let found = self
            .subjective_of(handle)?
            .map(|subjective| subjective.find_all(class))
            .unwrap_or_default();
        if found.is_empty() {
            return Ok(Status::NoItems);
        }
        out.extend(found);
        Ok(Status::Success)
    }

    /// Returns `true` if an enabled detail that is an instance of `D` is attached.
    pub fn has_detail<D: Detail>(&self, handle: SubjectHandle) -> bool {
        let Ok(class) = self.shared.machine.detail_id_of::<D>() else { return false };
        matches!(self.subjective_of(handle), Ok(Some(subjective)) if subjective.find(class).is_some())
    }

    /// Runs `f` on the first enabled detail viewable as `D`.
    pub fn with_detail<D: Detail, R>(&self, handle: SubjectHandle, f: impl FnOnce(&D) -> R) -> ApparatusResult<R> {
        let cell = self.detail_cell::<D>(handle)?;
        let detail = cell.read::<D>().ok_or_else(missing_detail::<D>)?;
        Ok(f(&detail))
    }

    /// Runs `f` on the first enabled detail viewable as `D`, mutably.
    pub fn with_detail_mut<D: Detail, R>(
        &self,
        handle: SubjectHandle,
        f: impl FnOnce(&mut D) -> R,
    ) -> ApparatusResult<R> {
        let cell = self.detail_cell::<D>(handle)?;
        let mut detail = cell.write::<D>().ok_or_else(missing_detail::<D>)?;
        Ok(f(&mut detail))
    }

    fn detail_cell<D: Detail>(&self, handle: SubjectHandle) -> ApparatusResult<Arc<DetailCell>> {
        let class: DetailId = self.shared.machine.detail_id_of::<D>()?;
        self.subjective_of(handle)?
            .and_then(|subjective| subjective.find(class))
            .ok_or_else(missing_detail::<D>)
    }

    /// The subjective carrying the subject's details, if any.
    pub fn subjective_of(&self, handle: SubjectHandle) -> ApparatusResult<Option<Arc<Subjective>>> {
        let pool = self.shared.machine.subjects();
        Ok(self.shared.locate(&pool, handle)?.subjective.clone())
    }

    // ---------------------------------------------------------------------
    // Chains, boot and deferreds
    // ---------------------------------------------------------------------

    /// Collects the chunks (or, for filters with details, the belts) matching
    /// `filter` into a liquid chain.
    pub fn enchain(&self, filter: Filter) -> ApparatusResult<Chain> {
        self.shared.enchain(filter, false)
    }

    /// Like [`Mechanism::enchain`], but the chain is solid: structural changes
    /// are refused until it is disposed, which makes concurrent operating safe.
    pub fn enchain_solid(&self, filter: Filter) -> ApparatusResult<Chain> {
        self.shared.enchain(filter, true)
    }

    /// Enchains `filter` and runs one liquid pass of `f` over it.
    pub fn operate(&self, filter: Filter, f: impl FnMut(&mut Cursor)) -> Outcome {
        self.enchain(filter)?.operate(f)
    }

    /// Enchains `filter` solid and runs `f` over it from up to `max_threads`
    /// rayon workers, returning once every worker is done.
    pub fn operate_concurrently<F>(
        &self,
        filter: Filter,
        f: F,
        max_threads: usize,
        min_slots_per_thread: usize,
    ) -> Outcome
    where
        F: Fn(&mut Cursor) + Send + Sync + 'static,
    {
        self.enchain_solid(filter)?.operate_concurrently(f, max_threads, min_slots_per_thread, true)
    }

    /// Sets `Booted` on every halted subject. `Noop` while solid.
    pub fn boot_all(&self) -> Outcome {
        self.shared.boot_all()
    }

    /// Applies queued deferred changes in FIFO order. Requires a liquid
    /// mechanism. Changes whose subject died meanwhile are skipped.
    pub fn apply_deferreds(&self) -> Outcome {
        self.shared.apply_deferreds()
    }

    /// Returns `true` if deferred changes are waiting.
    #[inline]
    pub fn has_deferreds(&self) -> bool {
        !self.shared.deferreds_rx.is_empty()
    }

    /// Returns `true` while a solid chain exists.
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.shared.locks.is_solid()
    }

    /// Returns `true` unless a solid chain exists.
    #[inline]
    pub fn is_liquid(&self) -> bool {
        self.shared.locks.is_liquid()
    }

    /// Returns `true` while any chain exists.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.shared.locks.is_locked()
    }

    /// Number of chunks.
    pub fn chunks_num(&self) -> usize {
        let access = self.shared.access.shared();
        self.shared.data(&access).chunks.len()
    }

    /// Number of belts.
    pub fn belts_num(&self) -> usize {
        let access = self.shared.access.shared();
        self.shared.data(&access).belts.len()
    }

    /// Number of live subjects owned by this mechanism.
    #[inline]
    pub fn subjects_num(&self) -> usize {
        self.shared.subjects.load(Ordering::Relaxed)
    }
}

assert_impl_all!(Mechanism: Send, Sync);

impl fmt::Debug for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mechanism")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("subjects", &self.subjects_num())
            .field("locks", &self.shared.locks.get())
            .finish()
    }
}
