//! Cross-process file lock manager for on-disk artifacts (caches, metadata
//! stores, build state) shared by independent processes on the same
//! machine.
//!
//! Each protected target gets a sidecar lock file with two fixed binary
//! regions: a 2-byte state region (protocol version + a clean/dirty flag
//! that survives a crash) and an information region recording the current
//! owner's process id and port, so a contended waiter can diagnose or ping
//! the holder. See [`LockManager`] for the entry point.
//!
//! This crate does not read or write the bytes of the target it protects —
//! only the sidecar lock file. Distributed (cross-host) locking, waiter
//! fairness, lock-mode upgrade, and reentrancy are explicitly out of scope.

mod codec;
mod collaborators;
mod config;
mod error;
mod mode;
mod paths;
mod region_lock;
mod session;

mod manager;

pub use collaborators::{NoopPingTransport, OwnerPingTransport, PidProcessIdentifier, ProcessIdentifierProvider};
pub use config::LockManagerConfig;
pub use error::LockError;
pub use manager::LockManager;
pub use mode::{LockMode, RequestedLockMode};
pub use session::{LockSession, WriteCycleError};
