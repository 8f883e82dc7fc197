//! # Traits, Details and their Registries
//!
//! This module defines the two kinds of data a subject can carry and the
//! registries that assign them compact runtime ids.
//!
//! ## Traits
//! A [`Trait`] is a plain, homogeneous value type. Traits are stored by value in
//! the trait lines of a chunk; every subject of a chunk carries exactly the same
//! set of traits. Registration installs a factory that builds an empty,
//! type-erased [`ErasedLine`] for the trait so chunks can allocate lines from a
//! [`TraitId`] alone.
//!
//! ## Details
//! A [`Detail`] is a boxed, polymorphic object attached to a *subjective*. A
//! subjective may hold several details of the same class, and detail classes
//! may form a hierarchy: after `register_detail_base::<Derived, Base>()` every
//! `Derived` also counts as a `Base` for filtering, and can be read as a `Base`
//! through its `AsRef`/`AsMut` conversion.
//!
//! ## Bundles
//! Spawning takes an initial set of trait values. Tuples of traits implement
//! [`IntoTraitBundle`]; the dynamic [`TraitBundle`] covers the cases where the
//! set is only known at runtime (deferred spawns, cloning).
//!
//! ## Invariants
//! - Ids are unique per registry and stable for the registry's lifetime.
//! - Every registered trait has a line factory.
//! - A detail class mask always contains the class itself and, transitively,
//!   every registered base.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::{align_of, size_of},
    sync::Arc,
};

use smallvec::SmallVec;

use crate::engine::error::{ApparatusResult, CapacityError};
use crate::engine::machine::Machine;
use crate::engine::storage::{ErasedLine, Line};
use crate::engine::types::{BitMask, DetailId, TraitId, DETAIL_CAP, TRAIT_CAP};


/// Plain data component stored by value in chunk trait lines.
///
/// Implement it explicitly for every type used as a trait:
///
/// ```ignore
/// #[derive(Clone, Copy, Default, Debug, PartialEq)]
/// struct Position { x: f32, y: f32 }
/// impl Trait for Position {}
/// ```
pub trait Trait: Clone + Default + Send + Sync + 'static {}

/// Dynamic type access for boxed details.
pub trait AsAny: Any {
    /// Borrows `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
    /// Borrows `self` as `&mut dyn Any`.
    fn as_any_mut(&mut self) -> &mut dyn Any;
    /// Rust type name of the concrete type.
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }
}

/// Polymorphic object component attached to a subjective.
pub trait Detail: AsAny + Send + Sync + 'static {}

/// Builds an empty line of the given block capacity.
pub type LineFactory = fn(usize) -> Box<dyn ErasedLine>;

fn new_line<T: Trait>(block_capacity: usize) -> Box<dyn ErasedLine> {
    Box::new(Line::<T>::new(block_capacity))
}

/// Describes a registered trait type.
#[derive(Clone, Copy, Debug)]
pub struct TraitDesc {
    /// Runtime id.
    pub id: TraitId,
    /// Rust type name for diagnostics.
    pub name: &'static str,
    /// Runtime `TypeId`.
    pub type_id: TypeId,
    /// `size_of::<T>()`.
    pub size: usize,
    /// `align_of::<T>()`.
    pub align: usize,
    /// Empty-line constructor.
    pub factory: LineFactory,
}

impl TraitDesc {
    fn of<T: Trait>(id: TraitId) -> Self {
        Self {
            id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
            factory: new_line::<T>,
        }
    }
}

/// Assigns [`TraitId`]s to trait types.
#[derive(Default)]
pub struct TraitRegistry {
    by_type: HashMap<TypeId, TraitId>,
    by_id: Vec<TraitDesc>,
}

impl TraitRegistry {
    /// Returns the id of `T`, if registered.
    #[inline]
    pub fn id_of<T: 'static>(&self) -> Option<TraitId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Registers `T` (idempotent) and returns its id.
    pub fn register<T: Trait>(&mut self) -> ApparatusResult<TraitId> {
        if let Some(id) = self.id_of::<T>() {
            return Ok(id);
        }
        if self.by_id.len() >= TRAIT_CAP {
            return Err(CapacityError {
                what: "trait",
                requested: self.by_id.len() + 1,
                capacity: TRAIT_CAP,
            }
            .into());
        }
        let id = self.by_id.len() as TraitId;
        self.by_type.insert(TypeId::of::<T>(), id);
        self.by_id.push(TraitDesc::of::<T>(id));
        Ok(id)
    }

    /// Descriptor of a registered trait.
    #[inline]
    pub fn desc(&self, id: TraitId) -> Option<&TraitDesc> {
        self.by_id.get(id as usize)
    }

    /// Number of registered traits.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Reinterprets a detail as one of its bases.
pub type UpcastRef = fn(&dyn Any) -> Option<&dyn Any>;
/// Mutable counterpart of [`UpcastRef`].
pub type UpcastMut = fn(&mut dyn Any) -> Option<&mut dyn Any>;

fn upcast_ref<D, B>(value: &dyn Any) -> Option<&dyn Any>
where
    D: AsRef<B> + 'static,
    B: 'static,
{
    value.downcast_ref::<D>().map(|derived| derived.as_ref() as &dyn Any)
}

fn upcast_mut<D, B>(value: &mut dyn Any) -> Option<&mut dyn Any>
where
    D: AsMut<B> + 'static,
    B: 'static,
{
    value.downcast_mut::<D>().map(|derived| derived.as_mut() as &mut dyn Any)
}

/// A direct base class of a detail class.
#[derive(Clone, Copy, Debug)]
pub struct DetailBase {
    /// Base class id.
    pub id: DetailId,
    /// Base class `TypeId`.
    pub type_id: TypeId,
    /// Shared view conversion.
    pub upcast_ref: UpcastRef,
    /// Exclusive view conversion.
    pub upcast_mut: UpcastMut,
}

/// Describes a registered detail class.
#[derive(Clone, Debug)]
pub struct DetailDesc {
    /// Runtime id.
    pub id: DetailId,
    /// Rust type name for diagnostics.
    pub name: &'static str,
    /// Runtime `TypeId`.
    pub type_id: TypeId,
    /// The class and all of its (transitive) bases.
    pub class_mask: BitMask,
    /// Direct bases with their view conversions.
    pub bases: Arc<[DetailBase]>,
}

/// Assigns [`DetailId`]s to detail classes and tracks their hierarchy.
#[derive(Default)]
pub struct DetailRegistry {
    by_type: HashMap<TypeId, DetailId>,
    by_id: Vec<DetailDesc>,
}

impl DetailRegistry {
    /// Returns the id of the class with `type_id`, if registered.
    #[inline]
    pub fn id_of_type(&self, type_id: TypeId) -> Option<DetailId> {
        self.by_type.get(&type_id).copied()
    }

    /// Registers a class by its runtime type (idempotent).
    pub fn register_type(&mut self, type_id: TypeId, name: &'static str) -> ApparatusResult<DetailId> {
        if let Some(id) = self.id_of_type(type_id) {
            return Ok(id);
        }
        if self.by_id.len() >= DETAIL_CAP {
            return Err(CapacityError {
                what: "detail",
                requested: self.by_id.len() + 1,
                capacity: DETAIL_CAP,
            }
            .into());
        }
        let id = self.by_id.len() as DetailId;
        self.by_type.insert(type_id, id);
        self.by_id.push(DetailDesc {
            id,
            name,
            type_id,
            class_mask: BitMask::from_bits([id as usize]),
            bases: Arc::from(Vec::new()),
        });
        Ok(id)
    }

    /// Registers `D` (idempotent).
    #[inline]
    pub fn register<D: Detail>(&mut self) -> ApparatusResult<DetailId> {
        self.register_type(TypeId::of::<D>(), type_name::<D>())
    }

    /// Declares that `D` is-a `B`.
    ///
    /// The class masks of `D` and of every class already derived from `D`
    /// absorb the mask of `B`.
    pub fn register_base<D, B>(&mut self) -> ApparatusResult<(DetailId, DetailId)>
    where
        D: Detail + AsRef<B> + AsMut<B>,
        B: Detail,
    {
        let derived = self.register::<D>()?;
        let base = self.register::<B>()?;
        let base_mask = self.by_id[base as usize].class_mask.clone();

        let desc = &mut self.by_id[derived as usize];
        if !desc.bases.iter().any(|known| known.id == base) {
            let mut bases = desc.bases.to_vec();
            bases.push(DetailBase {
                id: base,
                type_id: TypeId::of::<B>(),
                upcast_ref: upcast_ref::<D, B>,
                upcast_mut: upcast_mut::<D, B>,
            });
            desc.bases = Arc::from(bases);
        }
        for desc in self.by_id.iter_mut() {
            if desc.class_mask.has(derived as usize) {
                desc.class_mask.union_with(&base_mask);
            }
        }
        Ok((derived, base))
    }

    /// Descriptor of a registered class.
    #[inline]
    pub fn desc(&self, id: DetailId) -> Option<&DetailDesc> {
        self.by_id.get(id as usize)
    }

    /// Number of registered classes.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Dynamically assembled set of initial trait values.
#[derive(Default)]
pub struct TraitBundle {
    mask: BitMask,
    values: Vec<(TraitId, Box<dyn Any + Send>)>,
}

impl TraitBundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value. A later insert of the same trait replaces the earlier one.
    pub fn insert<T: Trait>(&mut self, trait_id: TraitId, value: T) {
        self.insert_boxed(trait_id, Box::new(value));
    }

    /// Adds an already boxed value.
    pub fn insert_boxed(&mut self, trait_id: TraitId, value: Box<dyn Any + Send>) {
        if self.mask.has(trait_id as usize) {
            self.values.retain(|(id, _)| *id != trait_id);
        }
        self.mask.set(trait_id as usize);
        self.values.push((trait_id, value));
    }

    /// Removes and returns the value for `trait_id`.
    pub fn take(&mut self, trait_id: TraitId) -> Option<Box<dyn Any + Send>> {
        let index = self.values.iter().position(|(id, _)| *id == trait_id)?;
        self.mask.clear(trait_id as usize);
        Some(self.values.swap_remove(index).1)
    }

    /// Iterates over the stored values.
    pub fn iter(&self) -> impl Iterator<Item = (TraitId, &(dyn Any + Send))> + '_ {
        self.values.iter().map(|(id, value)| (*id, value.as_ref()))
    }

    /// Traits present in the bundle.
    #[inline]
    pub fn mask(&self) -> &BitMask {
        &self.mask
    }

    /// Number of values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the bundle holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for TraitBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraitBundle").field("traits", &self.mask).finish()
    }
}

/// A statically known list of trait types.
pub trait TraitSet: 'static {
    /// Ids of the listed traits, registering them on first use.
    fn trait_ids(machine: &Machine) -> ApparatusResult<SmallVec<[TraitId; 8]>>;
}

/// Values convertible into a [`TraitBundle`].
pub trait IntoTraitBundle: Send + 'static {
    /// Converts `self`, registering the traits on first use.
    fn into_bundle(self, machine: &Machine) -> ApparatusResult<TraitBundle>;
}

impl IntoTraitBundle for TraitBundle {
    #[inline]
    fn into_bundle(self, _machine: &Machine) -> ApparatusResult<TraitBundle> {
        Ok(self)
    }
}

impl TraitSet for () {
    fn trait_ids(_machine: &Machine) -> ApparatusResult<SmallVec<[TraitId; 8]>> {
        Ok(SmallVec::new())
    }
}

impl IntoTraitBundle for () {
    fn into_bundle(self, _machine: &Machine) -> ApparatusResult<TraitBundle> {
        Ok(TraitBundle::new())
    }
}

macro_rules! impl_trait_tuples {
    ($(($($name:ident),+)),+ $(,)?) => {$(
        impl<$($name: Trait),+> TraitSet for ($($name,)+) {
            fn trait_ids(machine: &Machine) -> ApparatusResult<SmallVec<[TraitId; 8]>> {
                Ok(smallvec::smallvec![$(machine.trait_id_of::<$name>()?),+])
            }
        }

        impl<$($name: Trait),+> IntoTraitBundle for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_bundle(self, machine: &Machine) -> ApparatusResult<TraitBundle> {
                let ($($name,)+) = self;
                let mut bundle = TraitBundle::new();
                $(bundle.insert(machine.trait_id_of::<$name>()?, $name);)+
                Ok(bundle)
            }
        }
    )+};
}

impl_trait_tuples!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
    (A, B, C, D, E, F, G),
    (A, B, C, D, E, F, G, H),
);
