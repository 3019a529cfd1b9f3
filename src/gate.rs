//! A process-wide reader/writer gate separating mutator activity from
//! reclamation sweeps.
//!
//! Mutators take a shared hold while they read/update node links. The
//! purgatory cleaner takes an exclusive hold only for the short windows in
//! which it snapshots or detaches the purgatory stack's head. An exclusive
//! acquisition establishes that every mutator that started before the
//! acquisition has finished -- the grace-period property purgatory relies on
//! to know a node it's about to free can no longer be reached.
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::thread;

use crate::config::GateKind;

/// Bit 31 is the writer flag; bits 0..30 hold the reader count. Mirrors
/// `rw_spin_lock::WRITE_BIT` from the original spinlock list.
const WRITER_BIT: u32 = 1 << 31;

/// Either a blocking, reader-preferring shared mutex, or a spinning
/// CAS-based word. Both honor the same acquire/release contract.
pub enum Gate {
    Blocking(RwLock<()>),
    Spinning(AtomicU32),
}

impl Gate {
    pub fn new(kind: GateKind) -> Self {
        match kind {
            GateKind::Blocking => Gate::Blocking(RwLock::new(())),
            GateKind::Spinning => Gate::Spinning(AtomicU32::new(0)),
        }
    }

    /// Acquire a shared hold. Returns a guard that releases on drop.
    pub fn acquire_shared(&self) -> GateGuard<'_> {
        match self {
            Gate::Blocking(lock) => {
                GateGuard::Shared(lock.read().unwrap_or_else(|poison| poison.into_inner()))
            }
            Gate::Spinning(word) => {
                loop {
                    let old = word.load(Ordering::Relaxed);
                    if old & WRITER_BIT == 0
                        && word
                            .compare_exchange_weak(
                                old,
                                old + 1,
                                Ordering::Acquire,
                                Ordering::Relaxed,
                            )
                            .is_ok()
                    {
                        break;
                    }
                    if old & WRITER_BIT != 0 {
                        thread::yield_now();
                    }
                }
                GateGuard::SpinningShared(word)
            }
        }
    }

    /// Acquire an exclusive hold. Returns a guard that releases on drop.
    pub fn acquire_exclusive(&self) -> GateGuard<'_> {
        match self {
            Gate::Blocking(lock) => {
                GateGuard::Exclusive(lock.write().unwrap_or_else(|poison| poison.into_inner()))
            }
            Gate::Spinning(word) => {
                loop {
                    let old = word.load(Ordering::Relaxed);
                    if old & WRITER_BIT == 0
                        && word
                            .compare_exchange_weak(
                                old,
                                old | WRITER_BIT,
                                Ordering::Acquire,
                                Ordering::Relaxed,
                            )
                            .is_ok()
                    {
                        break;
                    }
                    thread::yield_now();
                }
                while word.load(Ordering::Acquire) != WRITER_BIT {
                    thread::yield_now();
                }
                GateGuard::SpinningExclusive(word)
            }
        }
    }
}

/// RAII guard whose `Drop` performs the matching release.
pub enum GateGuard<'a> {
    Shared(std::sync::RwLockReadGuard<'a, ()>),
    Exclusive(std::sync::RwLockWriteGuard<'a, ()>),
    SpinningShared(&'a AtomicU32),
    SpinningExclusive(&'a AtomicU32),
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        match self {
            GateGuard::SpinningShared(word) => {
                word.fetch_sub(1, Ordering::Release);
            }
            GateGuard::SpinningExclusive(word) => {
                word.store(0, Ordering::Release);
            }
            GateGuard::Shared(_) | GateGuard::Exclusive(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn exercise(gate: Arc<Gate>) {
        std::thread::scope(|s| {
            for _ in 0..8 {
                let gate = gate.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        let _g = gate.acquire_shared();
                    }
                });
            }
            s.spawn(|| {
                for _ in 0..100 {
                    let _g = gate.acquire_exclusive();
                }
            });
        });
    }

    #[test]
    fn blocking_gate_survives_contention() {
        exercise(Arc::new(Gate::new(GateKind::Blocking)));
    }

    #[test]
    fn spinning_gate_survives_contention() {
        exercise(Arc::new(Gate::new(GateKind::Spinning)));
    }
}
