//! # Deferred changes
//!
//! Structural changes requested while applying them directly is not allowed
//! (during a solid chain, or from a worker of a concurrent operate) are recorded
//! as [`Deferred`] values and pushed onto the mechanism's MPSC queue.
//!
//! ## Design
//! - A deferred is plain data describing *what* should happen to a subject.
//! - The queue is a `crossbeam_channel` unbounded channel: any thread may push,
//!   only [`Mechanism::apply_deferreds`](crate::Mechanism::apply_deferreds)
//!   drains it.
//! - Draining happens in FIFO order with the Polite paradigm, so a change that
//!   targets a subject despawned in the meantime is skipped silently.
//!
//! ## Invariants
//! - Handles for deferred spawns are allocated at request time; the subject is
//!   valid but unplaced until its `Spawn` is applied.
//! - Trait values must match the type registered for `trait_id`.

use std::any::Any;
use std::fmt;

use crate::engine::component::TraitBundle;
use crate::engine::flags::Flagmark;
use crate::engine::subject::SubjectHandle;
use crate::engine::types::TraitId;


/// A structural change waiting to be applied.
pub enum Deferred {
    /// Places a pre-allocated subject into the chunk of its bundle.
    Spawn {
        /// Handle allocated when the spawn was requested.
        subject: SubjectHandle,
        /// Initial trait values.
        bundle: TraitBundle,
        /// Initial flags.
        flagmark: Flagmark,
    },

    /// Despawns a subject.
    Despawn {
        /// Subject to remove.
        subject: SubjectHandle,
    },

    /// Sets a trait, migrating the subject if it does not carry it yet.
    SetTrait {
        /// Target subject.
        subject: SubjectHandle,
        /// Trait to write.
        trait_id: TraitId,
        /// New value; must be of the type registered for `trait_id`.
        value: Box<dyn Any + Send>,
    },

    /// Adds a defaulted trait if the subject does not carry it.
    ObtainTrait {
        /// Target subject.
        subject: SubjectHandle,
        /// Trait to add.
        trait_id: TraitId,
    },

    /// Removes a trait.
    RemoveTrait {
        /// Target subject.
        subject: SubjectHandle,
        /// Trait to remove.
        trait_id: TraitId,
    },

    /// Removes every trait.
    RemoveAllTraits {
        /// Target subject.
        subject: SubjectHandle,
    },
}

impl Deferred {
    /// The subject the change applies to.
    pub fn subject(&self) -> SubjectHandle {
        match self {
            Deferred::Spawn { subject, .. }
            | Deferred::Despawn { subject }
            | Deferred::SetTrait { subject, .. }
            | Deferred::ObtainTrait { subject, .. }
            | Deferred::RemoveTrait { subject, .. }
            | Deferred::RemoveAllTraits { subject } => *subject,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Deferred::Spawn { .. } => "spawn",
            Deferred::Despawn { .. } => "despawn",
            Deferred::SetTrait { .. } => "set_trait",
            Deferred::ObtainTrait { .. } => "obtain_trait",
            Deferred::RemoveTrait { .. } => "remove_trait",
            Deferred::RemoveAllTraits { .. } => "remove_all_traits",
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Deferred");
        out.field("kind", &self.name()).field("subject", &self.subject());
        match self {
            Deferred::SetTrait { trait_id, .. }
            | Deferred::ObtainTrait { trait_id, .. }
            | Deferred::RemoveTrait { trait_id, .. } => {
                out.field("trait_id", trait_id);
            }
            Deferred::Spawn { bundle, .. } => {
                out.field("traits", &bundle.len());
            }
            _ => {}
        }
        out.finish()
    }
}
