//! Error types returned at the list's and map's operation boundaries.
use thiserror::Error;

/// Failure modes for [`crate::list::List`] operations.
///
/// Tombstoned-node operations are *not* represented here: a racing erase on a
/// node an iterator still points at is a well-defined outcome (see
/// [`crate::list`] module docs), not a failure.
#[derive(Debug, Error)]
pub enum Error {
    /// Attempted to `insert` past `TAIL`, or to `erase`/step past a sentinel.
    #[error("operation out of range")]
    OutOfRange,
    /// Node allocation failed.
    #[error("node allocation failed: {0}")]
    Allocation(#[from] std::collections::TryReserveError),
}

pub type Result<T> = std::result::Result<T, Error>;
