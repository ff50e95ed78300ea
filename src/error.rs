//! Error taxonomy (spec.md §7).
//!
//! `FdkError` is the library-level typed error; `main` and the request
//! handlers work in terms of `anyhow::Result` so a handler failure can
//! always be turned into a reply instead of propagating to the server loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FdkError {
    /// Malformed config or CLI; fatal at start.
    #[error("configuration error: {0}")]
    Config(String),

    /// Any network or controller REST failure that should be retried until
    /// the confirmation loop observes the intended state.
    #[error("transient data-plane error: {0}")]
    Transient(String),

    /// No fog satisfies compute, or no path satisfies bandwidth. No
    /// data-plane or reservation state is mutated when this is returned.
    #[error("admission denied: {0}")]
    AdmissionDenied(String),

    /// A bandwidth-engine write succeeded but confirmation never observed
    /// it, or the container launch failed after the network was already
    /// reserved. The caller must roll back every step already performed.
    #[error("partial allocation fault: {0}")]
    PartialAllocationFault(String),

    /// In-memory reservation state was lost (e.g. on controller restart);
    /// the data-plane resources it described are now orphaned.
    #[error("orphaned reservation: {0}")]
    Orphan(String),

    /// Loss of the controller socket, or another condition that is logged
    /// but must not crash the process.
    #[error("fatal condition: {0}")]
    Fatal(String),
}

pub type FdkResult<T> = Result<T, FdkError>;
