//! Operational knobs for a [`crate::list::List`].
//!
//! None of this is wire protocol or environment configuration -- it is the
//! handful of constructor parameters a caller linking this crate directly
//! reaches for; process-level configuration (argv, env vars, files) stays
//! outside the crate.
use std::time::Duration;

/// Which [`crate::gate::Gate`] implementation backs a list's reclamation
/// quiescence point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// `std::sync::RwLock`-backed. Suits long critical sections and systems
    /// where OS-level blocking (rather than spinning) is preferred.
    Blocking,
    /// Hand-rolled `AtomicU32` reader-count/writer-flag word. Suits short
    /// critical sections where the cost of a syscall-based lock dominates.
    Spinning,
}

impl Default for GateKind {
    fn default() -> Self {
        GateKind::Spinning
    }
}

/// Constructor-time configuration for a [`crate::list::List`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Which gate implementation the list and its cleaner thread share.
    pub gate: GateKind,
    /// How long the cleaner sleeps between purgatory sweeps when there is
    /// nothing left to drain. On the order of 100ms works well in practice.
    pub cleaner_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gate: GateKind::default(),
            cleaner_interval: Duration::from_millis(100),
        }
    }
}
