//! # Subjects
//!
//! A subject is the runtime's entity: a generation-checked handle into the
//! machine-wide subject pool.
//!
//! ## Handles
//! [`SubjectHandle`] is `{id, generation}`. A handle is valid while the pool
//! record at `id` is alive and carries the same generation. Releasing a record
//! bumps its generation, so every handle taken before the release turns stale,
//! including after the id is reused by a later spawn. Generations start at 1;
//! [`SubjectHandle::INVALID`] (`{0, 0}`) never validates.
//!
//! ## Records
//! [`SubjectInfo`] stores where a subject lives: its owning mechanism, the
//! chunk and slot holding its traits, an optional subjective carrying its
//! details, and an optional network id.
//!
//! ## Concurrency
//! The pool itself is not synchronised; the machine keeps it behind a
//! `parking_lot::RwLock`. Structural code takes the mechanism's exclusive
//! access before the pool's write lock, never the other way around.

use std::fmt;
use std::sync::Arc;

use crate::engine::chunk::Chunk;
use crate::engine::component::Trait;
use crate::engine::error::{ApparatusResult, CapacityError, Outcome, Status};
use crate::engine::machine::Machine;
use crate::engine::mechanism::Mechanism;
use crate::engine::subjective::Subjective;
use crate::engine::types::{Generation, MechanismId, SubjectId, NULL_GENERATION};


/// Generation-checked subject handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SubjectHandle {
    /// Pool index.
    pub id: SubjectId,
    /// Generation of the pool record when the handle was issued.
    pub generation: Generation,
}

impl SubjectHandle {
    /// A handle that never refers to a subject.
    pub const INVALID: SubjectHandle = SubjectHandle { id: 0, generation: NULL_GENERATION };

    /// Packs the handle into one word.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        ((self.generation as u64) << 32) | self.id as u64
    }

    /// Inverse of [`SubjectHandle::to_bits`].
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self { id: bits as u32, generation: (bits >> 32) as u32 }
    }

    /// Returns `true` if the handle still refers to a live subject of `machine`.
    #[inline]
    pub fn is_valid(self, machine: &Machine) -> bool {
        self.generation != NULL_GENERATION && machine.is_valid(self)
    }
}

impl fmt::Debug for SubjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subject({}v{})", self.id, self.generation)
    }
}

/// Pool record of a subject.
#[derive(Clone, Default)]
pub struct SubjectInfo {
    /// Current generation.
    pub generation: Generation,
    /// Whether the record is in use.
    pub alive: bool,
    /// Owning mechanism.
    pub mechanism: MechanismId,
    /// Chunk holding the subject's traits; `None` until placed.
    pub chunk: Option<Arc<Chunk>>,
    /// Slot within `chunk`.
    pub slot: usize,
    /// Optional network id.
    pub network_id: Option<u64>,
    /// Object carrying the subject's details, if any.
    pub subjective: Option<Arc<Subjective>>,
}

impl SubjectInfo {
    /// Returns `true` if the subject has been placed into a chunk.
    #[inline]
    pub fn is_placed(&self) -> bool {
        self.chunk.is_some()
    }
}

/// Arena of subject records with generation checks and a free list.
#[derive(Default)]
pub struct SubjectPool {
    records: Vec<SubjectInfo>,
    free: Vec<SubjectId>,
    live: usize,
    max_live: usize,
}

impl SubjectPool {
    /// Creates a pool with room for `capacity` records and a ceiling of
    /// `max_live` simultaneously live subjects.
    pub fn new(capacity: usize, max_live: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
            max_live,
        }
    }

    /// Number of live subjects.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Allocates a record owned by `mechanism` and returns its handle.
    pub fn allocate(&mut self, mechanism: MechanismId) -> Result<SubjectHandle, CapacityError> {
        if self.live >= self.max_live {
            return Err(CapacityError {
                what: "subject",
                requested: self.live + 1,
                capacity: self.max_live,
            });
        }
        let id = match self.free.pop() {
            Some(id) => id,
            None => {
                if self.records.len() >= SubjectId::MAX as usize {
                    return Err(CapacityError {
                        what: "subject",
                        requested: self.records.len() + 1,
                        capacity: SubjectId::MAX as usize,
                    });
                }
                self.records.push(SubjectInfo { generation: NULL_GENERATION, ..SubjectInfo::default() });
                (self.records.len() - 1) as SubjectId
            }
        };
        let record = &mut self.records[id as usize];
        if record.generation == NULL_GENERATION {
            record.generation = 1;
        }
        record.alive = true;
        record.mechanism = mechanism;
        record.chunk = None;
        record.slot = 0;
        record.network_id = None;
        record.subjective = None;
        self.live += 1;
        Ok(SubjectHandle { id, generation: record.generation })
    }

    /// Releases the record of `handle`. Returns `false` if the handle is stale.
    pub fn release(&mut self, handle: SubjectHandle) -> bool {
        if !self.is_valid(handle) {
            return false;
        }
        let record = &mut self.records[handle.id as usize];
        record.alive = false;
        record.generation = match record.generation.wrapping_add(1) {
            NULL_GENERATION => 1,
            next => next,
        };
        record.chunk = None;
        record.subjective = None;
        record.network_id = None;
        self.free.push(handle.id);
        self.live -= 1;
        true
    }

    /// Returns `true` if `handle` refers to a live record.
    #[inline]
    pub fn is_valid(&self, handle: SubjectHandle) -> bool {
        self.records
            .get(handle.id as usize)
            .map_or(false, |record| record.alive && record.generation == handle.generation)
    }

    /// Record of a live handle.
    #[inline]
    pub fn info(&self, handle: SubjectHandle) -> Option<&SubjectInfo> {
        self.records
            .get(handle.id as usize)
            .filter(|record| record.alive && record.generation == handle.generation)
    }

    /// Mutable record of a live handle.
    #[inline]
    pub fn info_mut(&mut self, handle: SubjectHandle) -> Option<&mut SubjectInfo> {
        self.records
            .get_mut(handle.id as usize)
            .filter(|record| record.alive && record.generation == handle.generation)
    }

    /// Handles of every live subject owned by `mechanism`.
    pub fn owned_by(&self, mechanism: MechanismId) -> Vec<SubjectHandle> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.alive && record.mechanism == mechanism)
            .map(|(id, record)| SubjectHandle { id: id as SubjectId, generation: record.generation })
            .collect()
    }
}

/// A subject handle bound to its mechanism.
///
/// Convenience view returned by [`Mechanism::subject`]; every method forwards
/// to the mechanism with the Safe paradigm.
#[derive(Clone, Copy)]
pub struct SubjectRef<'m> {
    mechanism: &'m Mechanism,
    handle: SubjectHandle,
}

impl<'m> SubjectRef<'m> {
    pub(crate) fn new(mechanism: &'m Mechanism, handle: SubjectHandle) -> Self {
        Self { mechanism, handle }
    }

    /// The underlying handle.
    #[inline]
    pub fn handle(&self) -> SubjectHandle {
        self.handle
    }

    /// Returns `true` while the subject is alive.
    pub fn is_valid(&self) -> bool {
        self.mechanism.is_valid(self.handle)
    }

    /// Sets (adding if needed) trait `T`.
    pub fn set_trait<T: Trait>(&self, value: T) -> Outcome {
        self.mechanism.set_trait(self.handle, value)
    }

    /// Copy of trait `T`.
    pub fn get_trait<T: Trait>(&self) -> ApparatusResult<T> {
        self.mechanism.get_trait(self.handle)
    }

    /// Raw pointer to trait `T`. See [`Mechanism::get_trait_ptr`].
    pub fn get_trait_ptr<T: Trait>(&self) -> ApparatusResult<std::ptr::NonNull<T>> {
        self.mechanism.get_trait_ptr(self.handle)
    }

    /// Removes trait `T`.
    pub fn remove_trait<T: Trait>(&self) -> Outcome {
        self.mechanism.remove_trait::<T>(self.handle)
    }

    /// Adds a default `T` if missing.
    pub fn obtain_trait<T: Trait>(&self) -> Outcome {
        self.mechanism.obtain_trait::<T>(self.handle)
    }

    /// Returns `true` if the subject carries `T`.
    pub fn has_trait<T: Trait>(&self) -> bool {
        self.mechanism.has_trait::<T>(self.handle)
    }

    /// Despawns the subject.
    pub fn despawn(&self) -> Outcome {
        self.mechanism.despawn(self.handle)
    }
}

impl fmt::Debug for SubjectRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubjectRef").field(&self.handle).finish()
    }
}
