//! # Paradigms
//!
//! A paradigm selects how strictly a call checks its preconditions and how it
//! reports failures. The structural operations of a mechanism take an explicit
//! paradigm in their `*_with` variants; the plain variants use
//! [`Paradigm::Safe`].
//!
//! | Paradigm | Preconditions          | Soft failures            | Hard failures |
//! |----------|------------------------|--------------------------|---------------|
//! | `Safe`   | checked, `Err` on fail | returned as `Err`        | logged + `Err` |
//! | `Unsafe` | `debug_assert!` only   | returned as `Err`        | returned as `Err` |
//! | `Polite` | checked, `Err` on fail | reported as `Ok(Noop)`   | returned as `Err` |
//!
//! Soft failures are the ones [`ApparatusError::is_soft`] recognises: missing
//! traits, missing details, stale handles and exhausted iteration.

use tracing::warn;

use crate::engine::error::{ApparatusError, ApparatusResult, Status};


/// Error-handling tier of a call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Paradigm {
    /// Check everything and report failures as errors.
    #[default]
    Safe,
    /// Assume preconditions hold; only checked in debug builds.
    Unsafe,
    /// Like `Safe`, but expected failures become `Noop` silently.
    Polite,
}

impl Paradigm {
    /// Returns `true` if preconditions must be verified at runtime.
    #[inline]
    pub const fn checks(self) -> bool {
        !matches!(self, Paradigm::Unsafe)
    }

    /// Verifies a precondition according to the paradigm.
    ///
    /// `Unsafe` only asserts in debug builds and otherwise lets the call
    /// continue; the other paradigms return the error produced by `error`.
    #[inline]
    pub fn assess(
        self,
        condition: bool,
        error: impl FnOnce() -> ApparatusError,
    ) -> ApparatusResult<()> {
        if condition {
            return Ok(());
        }
        match self {
            Paradigm::Unsafe => {
                debug_assert!(condition, "precondition violated: {}", error());
                Ok(())
            }
            Paradigm::Safe | Paradigm::Polite => Err(error()),
        }
    }

    /// Finalises the outcome of an operation under this paradigm.
    pub fn settle(self, operation: &'static str, outcome: ApparatusResult<Status>) -> ApparatusResult<Status> {
        match outcome {
            Err(error) if self == Paradigm::Polite && error.is_soft() => Ok(Status::Noop),
            Err(error) => {
                if self == Paradigm::Safe && !error.is_soft() {
                    warn!(operation, code = error.code(), %error, "operation failed");
                }
                Err(error)
            }
            ok => ok,
        }
    }
}
