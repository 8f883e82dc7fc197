//! Runtime configuration for machines and mechanisms.
//!
//! Both configs are plain values with sensible defaults and `with_*` builders:
//!
//! ```ignore
//! let machine = Machine::with_config(MachineConfig::default().with_max_subjects(10_000));
//! let mechanism = Mechanism::with_config(&machine, MechanismConfig::named("world"));
//! ```

use crate::engine::types::DEFAULT_LINE_BLOCK_CAPACITY;


/// Settings of a [`Machine`](crate::Machine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    /// Number of subject records allocated up front.
    pub initial_subject_capacity: usize,
    /// Ceiling on simultaneously live subjects; spawning past it is `OutOfLimit`.
    pub max_subjects: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            initial_subject_capacity: 1024,
            max_subjects: (u32::MAX - 1) as usize,
        }
    }
}

impl MachineConfig {
    /// Sets [`MachineConfig::initial_subject_capacity`].
    pub fn with_initial_subject_capacity(mut self, capacity: usize) -> Self {
        self.initial_subject_capacity = capacity;
        self
    }

    /// Sets [`MachineConfig::max_subjects`].
    pub fn with_max_subjects(mut self, max_subjects: usize) -> Self {
        self.max_subjects = max_subjects;
        self
    }
}

/// Settings of a [`Mechanism`](crate::Mechanism).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MechanismConfig {
    /// Name used in log output.
    pub name: String,
    /// Rows per storage block of every trait line. Must be a power of two.
    pub line_block_capacity: usize,
    /// Size of the embedded cursor pool of each chain.
    pub embedded_cursors: usize,
    /// Boot halted subjects before enchaining a filter that requires `Booted`.
    pub boot_on_enchain: bool,
}

impl Default for MechanismConfig {
    fn default() -> Self {
        Self {
            name: String::from("mechanism"),
            line_block_capacity: DEFAULT_LINE_BLOCK_CAPACITY,
            embedded_cursors: 4,
            boot_on_enchain: true,
        }
    }
}

impl MechanismConfig {
    /// Default settings under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Sets [`MechanismConfig::line_block_capacity`], rounded up to a power of two.
    pub fn with_line_block_capacity(mut self, capacity: usize) -> Self {
        self.line_block_capacity = capacity.max(1).next_power_of_two();
        self
    }

    /// Sets [`MechanismConfig::embedded_cursors`].
    pub fn with_embedded_cursors(mut self, count: usize) -> Self {
        self.embedded_cursors = count;
        self
    }

    /// Sets [`MechanismConfig::boot_on_enchain`].
    pub fn with_boot_on_enchain(mut self, enabled: bool) -> Self {
        self.boot_on_enchain = enabled;
        self
    }
}
