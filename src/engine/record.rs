//! # Subject records
//!
//! A [`SubjectRecord`] is a detached copy of a subject: its trait values and
//! user-level flags, independent of any chunk. Records are taken with
//! [`Mechanism::record`](crate::Mechanism::record) or assembled by hand, and
//! spawned with
//! [`Mechanism::spawn_subject_from_record`](crate::Mechanism::spawn_subject_from_record)
//! into any mechanism of the same machine, as many times as needed.
//!
//! System-level flags (`Booted`, `Online`, ...) are never recorded: a subject
//! spawned from a record starts halted like any other.

use std::any::Any;
use std::fmt;

use crate::engine::component::{Trait, TraitBundle};
use crate::engine::error::ApparatusResult;
use crate::engine::flags::{Flag, Flagmark};
use crate::engine::machine::Machine;
use crate::engine::types::{BitMask, TraitId};


/// A trait value that can be duplicated without knowing its type.
pub trait RecordedValue: Send + Sync {
    /// Boxed copy of the value.
    fn duplicate(&self) -> Box<dyn RecordedValue>;
    /// Copy of the value, boxed as a bundle entry.
    fn to_boxed(&self) -> Box<dyn Any + Send>;
    /// The value itself.
    fn value_any(&self) -> &dyn Any;
}

pub(crate) struct Recorded<T>(pub(crate) T);

impl<T: Clone + Send + Sync + 'static> RecordedValue for Recorded<T> {
    fn duplicate(&self) -> Box<dyn RecordedValue> {
        Box::new(Recorded(self.0.clone()))
    }

    fn to_boxed(&self) -> Box<dyn Any + Send> {
        Box::new(self.0.clone())
    }

    fn value_any(&self) -> &dyn Any {
        &self.0
    }
}

/// Detached traits and flags of a subject.
#[derive(Default)]
pub struct SubjectRecord {
    mask: BitMask,
    traits: Vec<(TraitId, Box<dyn RecordedValue>)>,
    flagmark: Flagmark,
}

impl SubjectRecord {
    /// An empty record.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty record carrying the user-level part of `flagmark`.
    pub fn with_flagmark(flagmark: Flagmark) -> Self {
        Self { flagmark: flagmark & !Flagmark::SYSTEM_LEVEL, ..Self::default() }
    }

    pub(crate) fn insert_recorded(&mut self, trait_id: TraitId, value: Box<dyn RecordedValue>) {
        if self.mask.has(trait_id as usize) {
            self.traits.retain(|(id, _)| *id != trait_id);
        }
        self.mask.set(trait_id as usize);
        self.traits.push((trait_id, value));
    }

    /// Stores `value`, replacing an earlier value of the same trait.
    pub fn set_trait<T: Trait>(&mut self, machine: &Machine, value: T) -> ApparatusResult<()> {
        let trait_id = machine.trait_id_of::<T>()?;
        self.insert_recorded(trait_id, Box::new(Recorded(value)));
        Ok(())
    }

    /// Copy of the recorded `T`.
    pub fn get_trait<T: Trait>(&self) -> Option<T> {
        self.traits
            .iter()
            .find_map(|(_, value)| value.value_any().downcast_ref::<T>())
            .cloned()
    }

    /// Returns `true` if a `T` is recorded.
    pub fn has_trait<T: Trait>(&self) -> bool {
        self.traits.iter().any(|(_, value)| value.value_any().is::<T>())
    }

    /// Forgets the recorded `T`. Returns `false` if there was none.
    pub fn remove_trait<T: Trait>(&mut self) -> bool {
        let Some(index) = self.traits.iter().position(|(_, value)| value.value_any().is::<T>()) else {
            return false;
        };
        let (trait_id, _) = self.traits.remove(index);
        self.mask.clear(trait_id as usize);
        true
    }

    /// Traits present in the record.
    #[inline]
    pub fn traits_mask(&self) -> &BitMask {
        &self.mask
    }

    /// Number of recorded traits.
    #[inline]
    pub fn traits_num(&self) -> usize {
        self.traits.len()
    }

    /// Recorded user-level flags.
    #[inline]
    pub fn flagmark(&self) -> Flagmark {
        self.flagmark
    }

    /// Sets or clears a user-level flag. System-level flags are ignored.
    pub fn set_flag(&mut self, flag: Flag, state: bool) {
        if !flag.is_system_level() {
            self.flagmark = self.flagmark.with(flag, state);
        }
    }

    /// Fresh bundle with a copy of every recorded value.
    pub(crate) fn to_bundle(&self) -> TraitBundle {
        let mut bundle = TraitBundle::new();
        for (trait_id, value) in &self.traits {
            bundle.insert_boxed(*trait_id, value.to_boxed());
        }
        bundle
    }
}

impl Clone for SubjectRecord {
    fn clone(&self) -> Self {
        Self {
            mask: self.mask.clone(),
            traits: self.traits.iter().map(|(id, value)| (*id, value.duplicate())).collect(),
            flagmark: self.flagmark,
        }
    }
}

impl fmt::Debug for SubjectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubjectRecord")
            .field("traits", &self.mask)
            .field("flagmark", &self.flagmark)
            .finish()
    }
}
