//! # Flagmarks
//!
//! A flagmark is the 32-bit state word every subject carries next to its
//! traits. Unlike traits, flags change in place: toggling a flag never moves a
//! subject between chunks, which is why flags are checked at iteration time
//! rather than when a chain is built.
//!
//! ## Layout
//!
//! ```text
//! | 31 | 30 ........ 5 | 4               | 3      | 2      | 1      | 0     |
//! |  - | user A..Z     | DeferredDespawn | Editor | Online | Booted | Stale |
//! ```
//!
//! The low five bits are system-level and partly engine-managed:
//! `Stale` marks a released slot awaiting removal and `DeferredDespawn` marks a
//! subject with a queued despawn. Neither can be set through the public API.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use static_assertions::const_assert;


/// Bit positions of the individual flags.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Flag {
    Stale = 0,
    Booted = 1,
    Online = 2,
    Editor = 3,
    DeferredDespawn = 4,
    A = 5, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
}

const_assert!((Flag::Z as u8) < 31);

impl Flag {
    /// The single-bit flagmark of this flag.
    #[inline]
    pub const fn mark(self) -> Flagmark {
        Flagmark(1 << self as u8)
    }

    /// Returns `true` for the flags that only the engine may change.
    #[inline]
    pub const fn is_engine_managed(self) -> bool {
        matches!(self, Flag::Stale | Flag::DeferredDespawn)
    }

    /// Returns `true` for the five system-level flags.
    #[inline]
    pub const fn is_system_level(self) -> bool {
        (self as u8) < Flag::A as u8
    }
}

/// Packed set of [`Flag`]s.
#[repr(transparent)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flagmark(pub u32);

impl Flagmark {
    /// No flags.
    pub const NONE: Flagmark = Flagmark(0);
    /// Slot released, waiting to be removed.
    pub const STALE: Flagmark = Flag::Stale.mark();
    /// Subject has been booted.
    pub const BOOTED: Flagmark = Flag::Booted.mark();
    /// Subject is networked.
    pub const ONLINE: Flagmark = Flag::Online.mark();
    /// Subject belongs to editor tooling.
    pub const EDITOR: Flagmark = Flag::Editor.mark();
    /// A despawn is queued for the subject.
    pub const DEFERRED_DESPAWN: Flagmark = Flag::DeferredDespawn.mark();
    /// All system-level flags.
    pub const SYSTEM_LEVEL: Flagmark = Flagmark(0b1_1111);

    /// Returns `true` if `flag` is set.
    #[inline]
    pub const fn has(self, flag: Flag) -> bool {
        self.0 & (1 << flag as u8) != 0
    }

    /// Returns `true` if every flag of `other` is set.
    #[inline]
    pub const fn includes(self, other: Flagmark) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if any flag of `other` is set.
    #[inline]
    pub const fn intersects(self, other: Flagmark) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns a copy with `flag` set to `state`.
    #[inline]
    pub const fn with(self, flag: Flag, state: bool) -> Flagmark {
        if state {
            Flagmark(self.0 | (1 << flag as u8))
        } else {
            Flagmark(self.0 & !(1 << flag as u8))
        }
    }

    /// Returns `true` if no flag is set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl From<Flag> for Flagmark {
    fn from(flag: Flag) -> Self {
        flag.mark()
    }
}

impl BitOr for Flagmark {
    type Output = Flagmark;
    fn bitor(self, rhs: Self) -> Self::Output {
        Flagmark(self.0 | rhs.0)
    }
}

impl BitOr<Flag> for Flagmark {
    type Output = Flagmark;
    fn bitor(self, rhs: Flag) -> Self::Output {
        Flagmark(self.0 | rhs.mark().0)
    }
}

impl BitAnd for Flagmark {
    type Output = Flagmark;
    fn bitand(self, rhs: Self) -> Self::Output {
        Flagmark(self.0 & rhs.0)
    }
}

impl Not for Flagmark {
    type Output = Flagmark;
    fn not(self) -> Self::Output {
        Flagmark(!self.0)
    }
}

impl fmt::Debug for Flagmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flagmark({:#010x})", self.0)
    }
}
