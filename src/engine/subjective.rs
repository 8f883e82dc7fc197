//! # Subjectives and detail cells
//!
//! A [`Subjective`] is the object side of a subject: it owns the subject's
//! details, each wrapped in a [`DetailCell`]. Details are polymorphic boxed
//! values; a subjective may hold several details of the same class.
//!
//! Every change to the detail list bumps the subjective's revision, which is
//! how belt slots know their cached detail lines are out of date.
//!
//! ## Class hierarchy
//! A cell records the class mask of its detail at creation time (the class and
//! all of its registered bases). Typed access first tries the concrete class,
//! then the cell's direct bases through their registered `AsRef`/`AsMut`
//! conversions.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use smallvec::SmallVec;

use crate::engine::component::{AsAny, Detail, DetailBase};
use crate::engine::subject::SubjectHandle;
use crate::engine::types::{BeltId, BitMask, DetailId};


fn view<'a, D: 'static>(bases: &[DetailBase], value: &'a dyn Any) -> Option<&'a D> {
    if let Some(detail) = value.downcast_ref::<D>() {
        return Some(detail);
    }
    let base = bases.iter().find(|base| base.type_id == TypeId::of::<D>())?;
    (base.upcast_ref)(value)?.downcast_ref::<D>()
}

fn view_mut<'a, D: 'static>(bases: &[DetailBase], value: &'a mut dyn Any) -> Option<&'a mut D> {
    if value.is::<D>() {
        return value.downcast_mut::<D>();
    }
    let base = bases.iter().find(|base| base.type_id == TypeId::of::<D>())?;
    (base.upcast_mut)(value)?.downcast_mut::<D>()
}

/// A detail attached to a subjective.
pub struct DetailCell {
    class: DetailId,
    class_mask: BitMask,
    bases: Arc<[DetailBase]>,
    type_name: &'static str,
    enabled: AtomicBool,
    value: RwLock<Box<dyn Detail>>,
}

impl DetailCell {
    pub(crate) fn new(
        class: DetailId,
        class_mask: BitMask,
        bases: Arc<[DetailBase]>,
        value: Box<dyn Detail>,
    ) -> Self {
        let type_name = (*value).type_name();
        Self {
            class,
            class_mask,
            bases,
            type_name,
            enabled: AtomicBool::new(true),
            value: RwLock::new(value),
        }
    }

    /// Concrete class id.
    #[inline]
    pub fn class(&self) -> DetailId {
        self.class
    }

    /// The class and its bases.
    #[inline]
    pub fn class_mask(&self) -> &BitMask {
        &self.class_mask
    }

    /// Rust type name of the stored detail.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns `true` if the cell takes part in matching and iteration.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns `true` if the cell is an instance of `class` (directly or through a base).
    #[inline]
    pub fn is_a(&self, class: DetailId) -> bool {
        self.class_mask.has(class as usize)
    }

    /// Shared view of the detail as `D`.
    pub fn read<D: Detail>(&self) -> Option<MappedRwLockReadGuard<'_, D>> {
        let bases = &self.bases;
        RwLockReadGuard::try_map(self.value.read(), |boxed| view::<D>(bases, (**boxed).as_any())).ok()
    }

    /// Exclusive view of the detail as `D`.
    pub fn write<D: Detail>(&self) -> Option<MappedRwLockWriteGuard<'_, D>> {
        let bases = &self.bases;
        RwLockWriteGuard::try_map(self.value.write(), |boxed| {
            view_mut::<D>(bases, (**boxed).as_any_mut())
        })
        .ok()
    }

    /// Untyped shared view.
    #[inline]
    pub fn read_dyn(&self) -> RwLockReadGuard<'_, Box<dyn Detail>> {
        self.value.read()
    }
}

impl fmt::Debug for DetailCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetailCell")
            .field("class", &self.class)
            .field("type", &self.type_name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Object carrying a subject's details.
pub struct Subjective {
    subject: AtomicU64,
    details: RwLock<Vec<Arc<DetailCell>>>,
    revision: AtomicU64,
    placement: Mutex<Option<(BeltId, usize)>>,
}

impl Subjective {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            subject: AtomicU64::new(SubjectHandle::INVALID.to_bits()),
            details: RwLock::new(Vec::new()),
            revision: AtomicU64::new(0),
            placement: Mutex::new(None),
        })
    }

    /// The subject this object belongs to.
    #[inline]
    pub fn subject(&self) -> SubjectHandle {
        SubjectHandle::from_bits(self.subject.load(Ordering::Acquire))
    }

    pub(crate) fn set_subject(&self, subject: SubjectHandle) {
        self.subject.store(subject.to_bits(), Ordering::Release);
    }

    /// Counter bumped on every change to the detail list.
    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    #[inline]
    fn touch(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    /// Union of the class masks of all enabled details.
    pub fn details_mask(&self) -> BitMask {
        let mut mask = BitMask::new();
        for cell in self.details.read().iter().filter(|cell| cell.is_enabled()) {
            mask.union_with(cell.class_mask());
        }
        mask
    }

    /// Number of attached details.
    pub fn details_num(&self) -> usize {
        self.details.read().len()
    }

    /// Snapshot of the attached detail cells.
    pub fn details(&self) -> Vec<Arc<DetailCell>> {
        self.details.read().clone()
    }

    /// First enabled detail that is an instance of `class`.
    pub fn find(&self, class: DetailId) -> Option<Arc<DetailCell>> {
        self.details
            .read()
            .iter()
            .find(|cell| cell.is_enabled() && cell.is_a(class))
            .cloned()
    }

    /// Every enabled detail that is an instance of `class`.
    pub fn find_all(&self, class: DetailId) -> SmallVec<[Arc<DetailCell>; 1]> {
        self.details
            .read()
            .iter()
            .filter(|cell| cell.is_enabled() && cell.is_a(class))
            .cloned()
            .collect()
    }

    /// Enables or disables every detail of `class`. Returns how many changed.
    pub fn set_enabled(&self, class: DetailId, enabled: bool) -> usize {
        let mut changed = 0;
        for cell in self.details.read().iter().filter(|cell| cell.is_a(class)) {
            if cell.enabled.swap(enabled, Ordering::AcqRel) != enabled {
                changed += 1;
            }
        }
        if changed > 0 {
            self.touch();
        }
        changed
    }

    pub(crate) fn push(&self, cell: Arc<DetailCell>) {
        self.details.write().push(cell);
        self.touch();
    }

    pub(crate) fn remove_class(&self, class: DetailId) -> usize {
        let mut details = self.details.write();
        let before = details.len();
        details.retain(|cell| !cell.is_a(class));
        let removed = before - details.len();
        drop(details);
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Belt and slot the subjective currently occupies.
    #[inline]
    pub fn placement(&self) -> Option<(BeltId, usize)> {
        *self.placement.lock()
    }

    pub(crate) fn set_placement(&self, placement: Option<(BeltId, usize)>) {
        *self.placement.lock() = placement;
    }

    /// Moves the placement from `from` to `to` if it still equals `from`.
    pub(crate) fn replace_placement(&self, from: (BeltId, usize), to: Option<(BeltId, usize)>) {
        let mut placement = self.placement.lock();
        if *placement == Some(from) {
            *placement = to;
        }
    }
}

impl fmt::Debug for Subjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subjective")
            .field("subject", &self.subject())
            .field("details", &self.details_num())
            .field("revision", &self.revision())
            .finish()
    }
}
