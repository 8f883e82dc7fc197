//! Status codes and error types.
//!
//! Every fallible operation in the runtime reports its result by value. The
//! success side is a [`Status`] (did the call change anything, was it queued,
//! was an existing item reused); the failure side is an [`ApparatusError`].
//! Together they form the *outcome* of a call:
//!
//! ```ignore
//! pub type Outcome = ApparatusResult<Status>;
//! ```
//!
//! ## Stable codes
//! Both halves map onto one signed code space so that hosts talking to the
//! runtime through a C ABI can forward results unchanged: non-negative codes are
//! statuses, negative codes are errors. See [`Status::code`] and
//! [`ApparatusError::code`].
//!
//! ## Payload errors
//! Failures that carry actionable context (which subject was stale, which trait
//! was missing, which type was expected) are small dedicated structs that
//! convert into [`ApparatusError`] through `From`, so internal code can bubble
//! them with `?`.
//!
//! ## Soft failures
//! Some failures are expected in normal operation (a lookup of an absent trait,
//! a despawn of an already despawned subject). [`ApparatusError::is_soft`]
//! identifies them; the Polite paradigm turns them into [`Status::Noop`].

use thiserror::Error;

use crate::engine::subject::SubjectHandle;


/// Success-side outcome of an operation.
#[repr(i8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing had to be changed.
    #[default]
    Noop = 0,
    /// The operation changed state.
    Success = 1,
    /// An existing item was reused instead of a new one being created.
    Reused = 2,
    /// The operation completed but there were no items to work on.
    NoItems = 3,
    /// The change was queued and will be applied later.
    Deferred = 4,
}

impl Status {
    /// Stable numeric code (non-negative).
    #[inline]
    pub const fn code(self) -> i8 {
        self as i8
    }

    /// Returns `true` for [`Status::Noop`].
    #[inline]
    pub const fn is_noop(self) -> bool {
        matches!(self, Status::Noop)
    }

    /// Folds two outcomes of a compound operation.
    ///
    /// Anything beats `Noop`; `Success` beats the rest.
    #[inline]
    pub fn combine(self, other: Status) -> Status {
        match (self, other) {
            (Status::Noop, other) => other,
            (this, Status::Noop) => this,
            (Status::Success, _) | (_, Status::Success) => Status::Success,
            (this, _) => this,
        }
    }
}

/// Returned when a subject handle no longer refers to a live subject, either
/// because it was despawned or because its slot was reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("subject {subject:?} is stale or was never spawned")]
pub struct StaleSubjectError {
    /// The offending handle.
    pub subject: SubjectHandle,
}

/// Returned when a subject (or the slot a cursor points at) does not carry the
/// requested trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("trait `{trait_name}` is missing")]
pub struct MissingTraitError {
    /// Rust type name of the requested trait.
    pub trait_name: &'static str,
}

/// Returned when no detail of the requested class is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("detail `{detail_name}` is missing")]
pub struct MissingDetailError {
    /// Rust type name of the requested detail.
    pub detail_name: &'static str,
}

/// Returned when a dynamically typed value does not match the storage it is
/// written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("type mismatch: expected `{expected}`, got `{actual}`")]
pub struct TypeMismatchError {
    /// Type the storage holds.
    pub expected: &'static str,
    /// Type that was supplied.
    pub actual: &'static str,
}

/// Returned when a registry or pool reaches its configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{what} limit reached ({requested} requested; capacity {capacity})")]
pub struct CapacityError {
    /// What ran out (e.g. `"trait"`, `"subject"`).
    pub what: &'static str,
    /// Total the operation needed.
    pub requested: usize,
    /// Ceiling that prevented it.
    pub capacity: usize,
}

/// Failure-side outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApparatusError {
    /// Unspecified failure.
    #[error("operation failed")]
    Error,

    /// An argument was out of its domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A required argument was absent.
    #[error("null argument: {0}")]
    NullArgument(&'static str),

    /// An index was outside the valid range.
    #[error("index {index} out of range (length {length})")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Valid length.
        length: usize,
    },

    /// Iteration is exhausted.
    #[error("no more items")]
    NoMore,

    /// The requested facility is not available right now.
    #[error("not available: {0}")]
    NotAvailable(&'static str),

    /// A subject handle is stale.
    #[error(transparent)]
    StaleSubject(#[from] StaleSubjectError),

    /// A trait is missing.
    #[error(transparent)]
    MissingTrait(#[from] MissingTraitError),

    /// A detail is missing.
    #[error(transparent)]
    MissingDetail(#[from] MissingDetailError),

    /// Something else is missing.
    #[error("missing: {0}")]
    Missing(&'static str),

    /// The operation is not valid for this object.
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// The object is in the wrong state for the operation.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A value had the wrong type.
    #[error(transparent)]
    WrongType(#[from] TypeMismatchError),

    /// The operation is not supported.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// The operation is not implemented.
    #[error("not implemented: {0}")]
    NoImplementation(&'static str),

    /// Two requests contradict each other.
    #[error("conflict: {0}")]
    Conflict(&'static str),

    /// An internal invariant did not hold.
    #[error("sanity check failed: {0}")]
    SanityCheckFailed(&'static str),

    /// The caller may not perform the operation.
    #[error("no permission: {0}")]
    NoPermission(&'static str),

    /// A configured limit was reached.
    #[error(transparent)]
    OutOfLimit(#[from] CapacityError),

    /// Allocation failed.
    #[error("out of memory")]
    NoMemory,

    /// Unrecoverable failure.
    #[error("fatal error: {0}")]
    FatalError(&'static str),
}

impl ApparatusError {
    /// Stable numeric code (negative).
    pub const fn code(&self) -> i8 {
        match self {
            ApparatusError::Error => -1,
            ApparatusError::InvalidArgument(_) => -2,
            ApparatusError::StaleSubject(_) => -2,
            ApparatusError::NullArgument(_) => -3,
            ApparatusError::OutOfRange { .. } => -4,
            ApparatusError::NoMore => -5,
            ApparatusError::NotAvailable(_) => -6,
            ApparatusError::MissingTrait(_) => -7,
            ApparatusError::MissingDetail(_) => -7,
            ApparatusError::Missing(_) => -7,
            ApparatusError::InvalidOperation(_) => -8,
            ApparatusError::InvalidState(_) => -9,
            ApparatusError::WrongType(_) => -10,
            ApparatusError::UnsupportedOperation(_) => -11,
            ApparatusError::NoImplementation(_) => -12,
            ApparatusError::Conflict(_) => -13,
            ApparatusError::SanityCheckFailed(_) => -14,
            ApparatusError::NoPermission(_) => -15,
            ApparatusError::OutOfLimit(_) => -16,
            ApparatusError::NoMemory => -17,
            ApparatusError::FatalError(_) => -18,
        }
    }

    /// Returns `true` for failures the Polite paradigm reports as `Noop`.
    pub const fn is_soft(&self) -> bool {
        matches!(
            self,
            ApparatusError::StaleSubject(_)
                | ApparatusError::MissingTrait(_)
                | ApparatusError::MissingDetail(_)
                | ApparatusError::Missing(_)
                | ApparatusError::NoMore
        )
    }

    /// Returns `true` for any flavour of the `Missing` code.
    pub const fn is_missing(&self) -> bool {
        self.code() == -7
    }
}

/// Result alias used throughout the runtime.
pub type ApparatusResult<T> = Result<T, ApparatusError>;

/// Status-only outcome of an operation.
pub type Outcome = ApparatusResult<Status>;
