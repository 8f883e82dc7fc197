//! # Apparatus
//!
//! Chunked Entity-Component-System runtime with filter-driven chains.
//!
//! ## Design Goals
//! - Structure-of-arrays chunks per exact trait set for cache efficiency
//! - Polymorphic, reference-type details cached per subject in belts
//! - Generation-checked subject handles from an injected [`Machine`]
//! - Liquid (single-threaded, structurally mutable) and solid (concurrent,
//!   structurally frozen) iteration
//! - Structural changes queued from callbacks and applied when safe
//!
//! ## Quick tour
//! ```rust
//! use apparatus::prelude::*;
//!
//! #[derive(Clone, Copy, Default, Debug, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! impl Trait for Position {}
//!
//! let machine = Machine::new();
//! let mechanism = Mechanism::new(&machine);
//! let subject = mechanism.spawn_subject((Position::default(),)).unwrap();
//!
//! let chain = mechanism.enchain(Filter::make::<(Position,)>(&machine).unwrap()).unwrap();
//! chain
//!     .operate(|cursor| {
//!         cursor.set_trait(Position { x: 1.0, y: 1.0 }).unwrap();
//!     })
//!     .unwrap();
//!
//! assert_eq!(mechanism.get_trait::<Position>(subject).unwrap(), Position { x: 1.0, y: 1.0 });
//! ```

#![deny(dead_code)]
#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::machine::Machine;
pub use engine::mechanism::Mechanism;

pub use engine::subject::{
    SubjectHandle,
    SubjectRef,
};

pub use engine::component::{
    Trait,
    Detail,
    AsAny,
    TraitBundle,
    TraitSet,
    IntoTraitBundle,
};

pub use engine::subjective::{
    Subjective,
    DetailCell,
};

pub use engine::filter::{
    Filter,
    Fingerprint,
};

pub use engine::flags::{
    Flag,
    Flagmark,
};

pub use engine::chain::{
    Chain,
    Segment,
};

pub use engine::cursor::Cursor;

pub use engine::record::SubjectRecord;

pub use engine::part::{
    Part,
    Parts,
    PartKind,
    Read,
    Write,
    Val,
    Ptr,
    DetailRead,
    DetailWrite,
    SubjectPart,
    SubjectivePart,
    CursorPart,
};

pub use engine::config::{
    MachineConfig,
    MechanismConfig,
};

pub use engine::paradigm::Paradigm;

pub use engine::error::{
    ApparatusResult,
    ApparatusError,
    Outcome,
    Status,
    StaleSubjectError,
    MissingTraitError,
    MissingDetailError,
    TypeMismatchError,
    CapacityError,
};

pub use engine::types::{
    TraitId,
    DetailId,
    SubjectId,
    MechanismId,
    Traitmark,
    Detailmark,
    BitMask,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use apparatus::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Machine,
        Mechanism,
        SubjectHandle,
        Trait,
        Detail,
        Filter,
        Flag,
        Flagmark,
        Chain,
        Cursor,
        Read,
        Write,
        Val,
        Ptr,
        DetailRead,
        DetailWrite,
        SubjectPart,
        SubjectivePart,
        CursorPart,
        Paradigm,
        Status,
        ApparatusError,
        ApparatusResult,
        MechanismConfig,
        SubjectRecord,
    };
}
