//! # Machine
//!
//! The machine is the process-level registry shared by every mechanism built on
//! it. It owns:
//!
//! - the trait registry (lazy [`TraitId`] assignment),
//! - the detail registry (lazy [`DetailId`] assignment plus class hierarchy),
//! - the subject pool behind all subject handles.
//!
//! It is an explicitly constructed, reference-counted service rather than a
//! global: create one with [`Machine::new`] and pass it to
//! [`Mechanism::new`](crate::Mechanism::new). Ids are consistent across every
//! mechanism of the same machine.
//!
//! ## Concurrency
//! All three tables sit behind `parking_lot::RwLock`s. Id lookups take the read
//! lock and only fall back to the write lock on first registration.

use std::any::{type_name, TypeId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::engine::component::{Detail, DetailRegistry, Trait, TraitDesc, TraitRegistry};
use crate::engine::config::MachineConfig;
use crate::engine::error::ApparatusResult;
use crate::engine::subject::{SubjectHandle, SubjectPool};
use crate::engine::types::{BitMask, DetailId, MechanismId, TraitId};


/// Process-level registry of trait and detail ids and subject records.
pub struct Machine {
    config: MachineConfig,
    traits: RwLock<TraitRegistry>,
    details: RwLock<DetailRegistry>,
    subjects: RwLock<SubjectPool>,
    next_mechanism: AtomicU32,
}

impl Machine {
    /// Creates a machine with the default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(MachineConfig::default())
    }

    /// Creates a machine with `config`.
    pub fn with_config(config: MachineConfig) -> Arc<Self> {
        let subjects = SubjectPool::new(config.initial_subject_capacity, config.max_subjects);
        Arc::new(Self {
            config,
            traits: RwLock::new(TraitRegistry::default()),
            details: RwLock::new(DetailRegistry::default()),
            subjects: RwLock::new(subjects),
            next_mechanism: AtomicU32::new(0),
        })
    }

    /// The configuration the machine was built with.
    #[inline]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Id of trait `T`, registering it on first use.
    pub fn trait_id_of<T: Trait>(&self) -> ApparatusResult<TraitId> {
        if let Some(id) = self.traits.read().id_of::<T>() {
            return Ok(id);
        }
        let id = self.traits.write().register::<T>()?;
        debug!(trait_id = id, name = type_name::<T>(), "registered trait");
        Ok(id)
    }

    /// Id of trait `T` if it was registered already.
    #[inline]
    pub fn find_trait_id<T: Trait>(&self) -> Option<TraitId> {
        self.traits.read().id_of::<T>()
    }

    /// Descriptor of a registered trait.
    pub fn trait_desc(&self, id: TraitId) -> Option<TraitDesc> {
        self.traits.read().desc(id).copied()
    }

    /// Id of detail class `D`, registering it on first use.
    pub fn detail_id_of<D: Detail>(&self) -> ApparatusResult<DetailId> {
        self.detail_id_of_type(TypeId::of::<D>(), type_name::<D>())
    }

    /// Id of the detail class with `type_id`, registering it on first use.
    pub fn detail_id_of_type(&self, type_id: TypeId, name: &'static str) -> ApparatusResult<DetailId> {
        if let Some(id) = self.details.read().id_of_type(type_id) {
            return Ok(id);
        }
        let id = self.details.write().register_type(type_id, name)?;
        debug!(detail_id = id, name, "registered detail");
        Ok(id)
    }

    /// Declares that detail class `D` is-a `B`.
    ///
    /// Register hierarchies before attaching details: detail cells capture their
    /// class mask when they are created.
    pub fn register_detail_base<D, B>(&self) -> ApparatusResult<()>
    where
        D: Detail + AsRef<B> + AsMut<B>,
        B: Detail,
    {
        self.details.write().register_base::<D, B>()?;
        Ok(())
    }

    /// Class mask (the class and its bases) of a registered detail class.
    pub fn detail_class_mask(&self, id: DetailId) -> BitMask {
        self.details
            .read()
            .desc(id)
            .map(|desc| desc.class_mask.clone())
            .unwrap_or_default()
    }

    /// Read access to the detail registry.
    #[inline]
    pub fn details(&self) -> RwLockReadGuard<'_, DetailRegistry> {
        self.details.read()
    }

    /// Returns `true` if `handle` refers to a live subject.
    #[inline]
    pub fn is_valid(&self, handle: SubjectHandle) -> bool {
        self.subjects.read().is_valid(handle)
    }

    /// Number of live subjects across all mechanisms.
    #[inline]
    pub fn subjects_num(&self) -> usize {
        self.subjects.read().live()
    }

    /// Read access to the subject pool.
    #[inline]
    pub fn subjects(&self) -> RwLockReadGuard<'_, SubjectPool> {
        self.subjects.read()
    }

    /// Write access to the subject pool.
    #[inline]
    pub fn subjects_mut(&self) -> RwLockWriteGuard<'_, SubjectPool> {
        self.subjects.write()
    }

    pub(crate) fn next_mechanism_id(&self) -> MechanismId {
        self.next_mechanism.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("traits", &self.traits.read().len())
            .field("details", &self.details.read().len())
            .field("subjects", &self.subjects_num())
            .finish()
    }
}
