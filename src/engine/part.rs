//! # Parts
//!
//! A *part* is one thing an iteration step may ask its cursor for: a trait by
//! value, by reference or by pointer, a detail, the subject handle, the
//! subjective, or the cursor itself. Each part type carries its [`PartKind`] and
//! knows how to fetch itself from a [`Cursor`], so the access path is chosen at
//! compile time.
//!
//! Tuples of parts implement [`Parts`] and are fetched together with
//! [`Cursor::parts`]. A tuple is validated against aliasing first: the same
//! trait or detail type may appear several times only if none of the requests
//! is writable.
//!
//! ```
//! use apparatus::prelude::*;
//!
//! #[derive(Clone, Copy, Default, Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! impl Trait for Position {}
//! #[derive(Clone, Copy, Default, Debug, PartialEq)]
//! struct Velocity { x: f32, y: f32 }
//! impl Trait for Velocity {}
//!
//! let machine = Machine::new();
//! let mechanism = Mechanism::new(&machine);
//! mechanism.spawn_subject((Position::default(), Velocity { x: 1.0, y: 2.0 })).unwrap();
//!
//! let filter = Filter::from_parts::<(Write<Position>, Read<Velocity>)>(&machine).unwrap();
//! let chain = mechanism.enchain(filter).unwrap();
//! chain
//!     .operate(|cursor| {
//!         let (position, velocity) = cursor.parts::<(Write<Position>, Read<Velocity>)>().unwrap();
//!         position.x += velocity.x;
//!         position.y += velocity.y;
//!     })
//!     .unwrap();
//! ```

use std::any::TypeId;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};
use smallvec::SmallVec;

use crate::engine::component::{Detail, Trait};
use crate::engine::cursor::Cursor;
use crate::engine::error::{ApparatusError, ApparatusResult, MissingDetailError, MissingTraitError};
use crate::engine::filter::Filter;
use crate::engine::machine::Machine;
use crate::engine::subject::SubjectHandle;
use crate::engine::subjective::{DetailCell, Subjective};


/// Classification of a part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartKind {
    /// A trait copied out of its line.
    TraitValue,
    /// A shared reference into a trait line.
    TraitRef,
    /// An exclusive reference into a trait line.
    TraitMut,
    /// A raw pointer into a trait line.
    TraitPtr,
    /// A shared view of a detail.
    DetailRef,
    /// An exclusive view of a detail.
    DetailMut,
    /// The subject handle.
    Subject,
    /// The subject's subjective.
    Subjective,
    /// The cursor itself.
    Cursor,
}

impl PartKind {
    /// Returns `true` for parts that read chunk storage.
    #[inline]
    pub const fn is_trait(self) -> bool {
        matches!(self, PartKind::TraitValue | PartKind::TraitRef | PartKind::TraitMut | PartKind::TraitPtr)
    }

    /// Returns `true` for parts that read belt storage.
    #[inline]
    pub const fn is_detail(self) -> bool {
        matches!(self, PartKind::DetailRef | PartKind::DetailMut)
    }
}

/// Type-level access requests of a part tuple: `(type, writable)`.
pub type Claims = SmallVec<[(TypeId, bool); 8]>;

fn claim(claims: &mut Claims, type_id: TypeId, writable: bool) -> ApparatusResult<()> {
    let conflict = claims
        .iter()
        .any(|&(claimed, claimed_writable)| claimed == type_id && (writable || claimed_writable));
    if conflict {
        return Err(ApparatusError::Conflict("the same type is requested mutably more than once"));
    }
    claims.push((type_id, writable));
    Ok(())
}

/// A single fetchable part.
pub trait Part: 'static {
    /// Classification of the part.
    const KIND: PartKind;

    /// What the part resolves to for one slot.
    type Output<'c>;

    /// Records the part's access request.
    fn claim(_claims: &mut Claims) -> ApparatusResult<()> {
        Ok(())
    }

    /// Adds what the part requires to `filter`.
    fn include(_filter: &mut Filter, _machine: &Machine) -> ApparatusResult<()> {
        Ok(())
    }

    /// Resolves the part for the cursor's current slot.
    ///
    /// # Safety
    /// Writable outputs must not alias: the caller validates the enclosing
    /// tuple with [`Part::claim`] and holds the cursor mutably for `'c`.
    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<Self::Output<'c>>;
}

fn trait_ptr<T: Trait>(cursor: &Cursor) -> ApparatusResult<NonNull<T>> {
    cursor
        .trait_ptr::<T>()
        .ok_or_else(|| MissingTraitError { trait_name: std::any::type_name::<T>() }.into())
}

fn include_trait<T: Trait>(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
    filter.include_trait_id(machine.trait_id_of::<T>()? as usize);
    Ok(())
}

fn include_detail<D: Detail>(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
    filter.include_detail_id(machine.detail_id_of::<D>()? as usize);
    Ok(())
}

/// Shared reference to trait `T`.
pub struct Read<T>(PhantomData<fn() -> T>);

impl<T: Trait> Part for Read<T> {
    const KIND: PartKind = PartKind::TraitRef;
    type Output<'c> = &'c T;

    fn claim(claims: &mut Claims) -> ApparatusResult<()> {
        claim(claims, TypeId::of::<T>(), false)
    }

    fn include(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
        include_trait::<T>(filter, machine)
    }

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<&'c T> {
        // SAFETY: the row stays in place while the cursor points at it.
        Ok(unsafe { &*trait_ptr::<T>(cursor)?.as_ptr() })
    }
}

/// Exclusive reference to trait `T`.
pub struct Write<T>(PhantomData<fn() -> T>);

impl<T: Trait> Part for Write<T> {
    const KIND: PartKind = PartKind::TraitMut;
    type Output<'c> = &'c mut T;

    fn claim(claims: &mut Claims) -> ApparatusResult<()> {
        claim(claims, TypeId::of::<T>(), true)
    }

    fn include(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
        include_trait::<T>(filter, machine)
    }

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<&'c mut T> {
        // SAFETY: the claim check guarantees no other reference to this
        // trait of this row is handed out for `'c`.
        Ok(unsafe { &mut *trait_ptr::<T>(cursor)?.as_ptr() })
    }
}

/// Copy of trait `T`.
pub struct Val<T>(PhantomData<fn() -> T>);

impl<T: Trait> Part for Val<T> {
    const KIND: PartKind = PartKind::TraitValue;
    type Output<'c> = T;

    fn claim(claims: &mut Claims) -> ApparatusResult<()> {
        claim(claims, TypeId::of::<T>(), false)
    }

    fn include(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
        include_trait::<T>(filter, machine)
    }

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<T> {
        // SAFETY: see `Read::fetch`.
        Ok(unsafe { (*trait_ptr::<T>(cursor)?.as_ptr()).clone() })
    }
}

/// Raw pointer to trait `T`, `None` if the subject lacks it. Not required by
/// filters built from parts.
pub struct Ptr<T>(PhantomData<fn() -> T>);

impl<T: Trait> Part for Ptr<T> {
    const KIND: PartKind = PartKind::TraitPtr;
    type Output<'c> = Option<NonNull<T>>;

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<Option<NonNull<T>>> {
        Ok(cursor.trait_ptr::<T>())
    }
}

fn pinned_cell<D: Detail>(cursor: &Cursor) -> ApparatusResult<&DetailCell> {
    if !cursor.is_belt() {
        return Err(ApparatusError::InvalidOperation("detail parts need a chain filtered by details"));
    }
    let class = cursor.machine().ok_or(ApparatusError::InvalidState("cursor is not active"))?.detail_id_of::<D>()?;
    cursor
        .pinned_cell(class)
        .map(|cell| &**cell)
        .ok_or_else(|| MissingDetailError { detail_name: std::any::type_name::<D>() }.into())
}

/// Shared view of the first pinned detail viewable as `D`.
pub struct DetailRead<D>(PhantomData<fn() -> D>);

impl<D: Detail> Part for DetailRead<D> {
    const KIND: PartKind = PartKind::DetailRef;
    type Output<'c> = MappedRwLockReadGuard<'c, D>;

    fn claim(claims: &mut Claims) -> ApparatusResult<()> {
        claim(claims, TypeId::of::<D>(), false)
    }

    fn include(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
        include_detail::<D>(filter, machine)
    }

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<Self::Output<'c>> {
        pinned_cell::<D>(cursor)?
            .read::<D>()
            .ok_or_else(|| MissingDetailError { detail_name: std::any::type_name::<D>() }.into())
    }
}

/// Exclusive view of the first pinned detail viewable as `D`.
pub struct DetailWrite<D>(PhantomData<fn() -> D>);

impl<D: Detail> Part for DetailWrite<D> {
    const KIND: PartKind = PartKind::DetailMut;
    type Output<'c> = MappedRwLockWriteGuard<'c, D>;

    fn claim(claims: &mut Claims) -> ApparatusResult<()> {
        claim(claims, TypeId::of::<D>(), true)
    }

    fn include(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
        include_detail::<D>(filter, machine)
    }

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<Self::Output<'c>> {
        pinned_cell::<D>(cursor)?
            .write::<D>()
            .ok_or_else(|| MissingDetailError { detail_name: std::any::type_name::<D>() }.into())
    }
}

/// The current subject's handle.
pub struct SubjectPart;

impl Part for SubjectPart {
    const KIND: PartKind = PartKind::Subject;
    type Output<'c> = SubjectHandle;

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<SubjectHandle> {
        Ok(cursor.subject())
    }
}

/// The current subject's subjective, if it has one.
pub struct SubjectivePart;

impl Part for SubjectivePart {
    const KIND: PartKind = PartKind::Subjective;
    type Output<'c> = Option<Arc<Subjective>>;

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<Option<Arc<Subjective>>> {
        Ok(cursor.subjective())
    }
}

/// The cursor itself.
pub struct CursorPart;

impl Part for CursorPart {
    const KIND: PartKind = PartKind::Cursor;
    type Output<'c> = &'c Cursor;

    unsafe fn fetch<'c>(cursor: &'c Cursor) -> ApparatusResult<&'c Cursor> {
        Ok(cursor)
    }
}

/// A tuple of [`Part`]s fetched together.
pub trait Parts: 'static {
    /// Tuple of the parts' outputs.
    type Output<'c>;

    /// Kinds of the parts, in order.
    fn kinds() -> SmallVec<[PartKind; 8]>;

    /// Adds every part's requirement to `filter`.
    fn include_all(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()>;

    /// Validates the tuple against aliasing.
    fn claim_all() -> ApparatusResult<()>;

    /// Resolves every part.
    ///
    /// # Safety
    /// [`Parts::claim_all`] must have succeeded, and the cursor must be held
    /// mutably for `'c`.
    unsafe fn fetch_all<'c>(cursor: &'c Cursor) -> ApparatusResult<Self::Output<'c>>;
}

macro_rules! impl_parts {
    ($(($($name:ident),+)),+ $(,)?) => {$(
        impl<$($name: Part),+> Parts for ($($name,)+) {
            type Output<'c> = ($($name::Output<'c>,)+);

            fn kinds() -> SmallVec<[PartKind; 8]> {
                smallvec::smallvec![$($name::KIND),+]
            }

            fn include_all(filter: &mut Filter, machine: &Machine) -> ApparatusResult<()> {
                $($name::include(filter, machine)?;)+
                Ok(())
            }

            fn claim_all() -> ApparatusResult<()> {
                let mut claims = Claims::new();
                $($name::claim(&mut claims)?;)+
                Ok(())
            }

            unsafe fn fetch_all<'c>(cursor: &'c Cursor) -> ApparatusResult<Self::Output<'c>> {
                // SAFETY: forwarded from the caller.
                Ok(($(unsafe { $name::fetch(cursor)? },)+))
            }
        }
    )+};
}

impl_parts!(
    (A),
    (A, B),
    (A, B, C),
    (A, B, C, D),
    (A, B, C, D, E),
    (A, B, C, D, E, F),
    (A, B, C, D, E, F, G),
    (A, B, C, D, E, F, G, H),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Default)]
    struct Position;
    impl Trait for Position {}

    #[test]
    fn a_writable_trait_may_not_be_requested_twice() {
        assert!(<(Read<Position>, Val<Position>)>::claim_all().is_ok());
        assert!(matches!(
            <(Write<Position>, Read<Position>)>::claim_all(),
            Err(ApparatusError::Conflict(_))
        ));
        assert!(<(Ptr<Position>, Write<Position>)>::claim_all().is_ok());
    }

    #[test]
    fn kinds_follow_tuple_order() {
        let kinds = <(SubjectPart, Read<Position>, CursorPart)>::kinds();
        assert_eq!(kinds.as_slice(), &[PartKind::Subject, PartKind::TraitRef, PartKind::Cursor]);
        assert!(PartKind::TraitPtr.is_trait());
        assert!(PartKind::DetailMut.is_detail());
    }
}
