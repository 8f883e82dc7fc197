//! Filters and fingerprints.
//!
//! A [`Fingerprint`] is what a subject *has*: its trait set, its detail
//! classes and its live flagmark. A [`Filter`] is what a chain *requires*:
//! included and excluded traits, details and flags.
//!
//! ## Matching
//! `fingerprint.matches(&filter)` holds iff
//! - every included trait and detail bit is set and no excluded one is, and
//! - `flagmark & include == include && flagmark & exclude == 0`.
//!
//! The check is split in two stages at runtime:
//! - *construction time*: chunks and belts are selected by their trait and
//!   detail sets only ([`Filter::matches_traits`], [`Filter::matches_details`]);
//! - *iteration time*: each slot's live flagmark (and, for belts, the live
//!   subjective) is checked as the cursor reaches it
//!   ([`Filter::matches_flagmark`]).
//!
//! ## Defaults
//! [`Filter::default`] requires [`Flag::Booted`] and excludes [`Flag::Stale`], so
//! halted subjects and released slots are skipped unless a filter opts in.
//!
//! Filters are immutable values with set semantics for `Eq`/`Hash`; the
//! mechanism keys its chunk and belt caches by them.

use crate::engine::component::{Detail, Trait, TraitSet};
use crate::engine::error::ApparatusResult;
use crate::engine::flags::{Flag, Flagmark};
use crate::engine::machine::Machine;
use crate::engine::part::Parts;
use crate::engine::types::BitMask;


/// A subject's live trait, detail and flag sets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Trait ids carried by the subject.
    pub traits: BitMask,
    /// Detail class ids (hierarchy-expanded) carried by the subject.
    pub details: BitMask,
    /// Live flags.
    pub flagmark: Flagmark,
}

impl Fingerprint {
    /// Returns `true` if the fingerprint satisfies `filter`.
    pub fn matches(&self, filter: &Filter) -> bool {
        filter.matches_traits(&self.traits)
            && filter.matches_details(&self.details)
            && filter.matches_flagmark(self.flagmark)
    }
}

/// Inclusion and exclusion requirements of a chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Filter {
    traits: BitMask,
    excluded_traits: BitMask,
    details: BitMask,
    excluded_details: BitMask,
    flagmark: Flagmark,
    excluded_flagmark: Flagmark,
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            traits: BitMask::new(),
            excluded_traits: BitMask::new(),
            details: BitMask::new(),
            excluded_details: BitMask::new(),
            flagmark: Flagmark::BOOTED,
            excluded_flagmark: Flagmark::STALE,
        }
    }
}

impl Filter {
    /// The default filter (requires `Booted`, excludes `Stale`).
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter that ignores flags entirely except `Stale`.
    pub fn any() -> Self {
        Self { flagmark: Flagmark::NONE, ..Self::default() }
    }

    /// A default filter requiring every trait of `L`.
    pub fn make<L: TraitSet>(machine: &Machine) -> ApparatusResult<Self> {
        let mut filter = Self::default();
        for id in L::trait_ids(machine)? {
            filter.traits.set(id as usize);
        }
        Ok(filter)
    }

    /// A default filter requiring whatever the part list `P` reads.
    pub fn from_parts<P: Parts>(machine: &Machine) -> ApparatusResult<Self> {
        let mut filter = Self::default();
        P::include_all(&mut filter, machine)?;
        Ok(filter)
    }

    /// Requires trait `T`.
    pub fn include<T: Trait>(mut self, machine: &Machine) -> ApparatusResult<Self> {
        self.include_trait_id(machine.trait_id_of::<T>()? as usize);
        Ok(self)
    }

    /// Rejects subjects carrying trait `T`.
    pub fn exclude<T: Trait>(mut self, machine: &Machine) -> ApparatusResult<Self> {
        let id = machine.trait_id_of::<T>()? as usize;
        self.traits.clear(id);
        self.excluded_traits.set(id);
        Ok(self)
    }

    /// Requires a detail of class `D` (or a class derived from it).
    pub fn include_detail<D: Detail>(mut self, machine: &Machine) -> ApparatusResult<Self> {
        self.include_detail_id(machine.detail_id_of::<D>()? as usize);
        Ok(self)
    }

    /// Rejects subjects carrying a detail of class `D`.
    pub fn exclude_detail<D: Detail>(mut self, machine: &Machine) -> ApparatusResult<Self> {
        let id = machine.detail_id_of::<D>()? as usize;
        self.details.clear(id);
        self.excluded_details.set(id);
        Ok(self)
    }

    /// Requires `flag`.
    pub fn include_flag(mut self, flag: Flag) -> Self {
        self.flagmark = self.flagmark.with(flag, true);
        self.excluded_flagmark = self.excluded_flagmark.with(flag, false);
        self
    }

    /// Rejects subjects with `flag` set.
    pub fn exclude_flag(mut self, flag: Flag) -> Self {
        self.excluded_flagmark = self.excluded_flagmark.with(flag, true);
        self.flagmark = self.flagmark.with(flag, false);
        self
    }

    pub(crate) fn include_trait_id(&mut self, id: usize) {
        self.excluded_traits.clear(id);
        self.traits.set(id);
    }

    pub(crate) fn include_detail_id(&mut self, id: usize) {
        self.excluded_details.clear(id);
        self.details.set(id);
    }

    /// Required traits.
    #[inline]
    pub fn traits(&self) -> &BitMask {
        &self.traits
    }

    /// Excluded traits.
    #[inline]
    pub fn excluded_traits(&self) -> &BitMask {
        &self.excluded_traits
    }

    /// Required detail classes.
    #[inline]
    pub fn details(&self) -> &BitMask {
        &self.details
    }

    /// Excluded detail classes.
    #[inline]
    pub fn excluded_details(&self) -> &BitMask {
        &self.excluded_details
    }

    /// Required flags.
    #[inline]
    pub fn flagmark(&self) -> Flagmark {
        self.flagmark
    }

    /// Excluded flags.
    #[inline]
    pub fn excluded_flagmark(&self) -> Flagmark {
        self.excluded_flagmark
    }

    /// Returns `true` if the filter requires any detail (and so is served by belts).
    #[inline]
    pub fn has_details(&self) -> bool {
        !self.details.is_empty()
    }

    /// Construction-time trait check.
    #[inline]
    pub fn matches_traits(&self, traits: &BitMask) -> bool {
        traits.includes(&self.traits) && !traits.intersects(&self.excluded_traits)
    }

    /// Detail check against a subject's (hierarchy-expanded) classes.
    #[inline]
    pub fn matches_details(&self, details: &BitMask) -> bool {
        details.includes(&self.details) && !details.intersects(&self.excluded_details)
    }

    /// Iteration-time flag check.
    #[inline]
    pub fn matches_flagmark(&self, flagmark: Flagmark) -> bool {
        flagmark.includes(self.flagmark) && !flagmark.intersects(self.excluded_flagmark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requires_booted_and_skips_stale() {
        let filter = Filter::default();
        assert!(filter.matches_flagmark(Flagmark::BOOTED));
        assert!(!filter.matches_flagmark(Flagmark::NONE));
        assert!(!filter.matches_flagmark(Flagmark::BOOTED | Flagmark::STALE));
    }

    #[test]
    fn include_flag_overrides_exclusion() {
        let filter = Filter::default().exclude_flag(Flag::A).include_flag(Flag::A);
        assert!(filter.matches_flagmark(Flagmark::BOOTED | Flag::A));
        let filter = filter.exclude_flag(Flag::A);
        assert!(!filter.matches_flagmark(Flagmark::BOOTED | Flag::A));
    }

    #[test]
    fn fingerprint_matching_uses_inclusion() {
        let mut filter = Filter::default();
        filter.include_trait_id(1);
        filter.excluded_traits.set(4);
        let fingerprint = Fingerprint {
            traits: BitMask::from_bits([1, 2]),
            details: BitMask::new(),
            flagmark: Flagmark::BOOTED,
        };
        assert!(fingerprint.matches(&filter));

        let fingerprint = Fingerprint { traits: BitMask::from_bits([1, 4]), ..fingerprint };
        assert!(!fingerprint.matches(&filter));
    }
}
