use std::path::PathBuf;

/// Errors raised by [`crate::LockManager`] and [`crate::LockSession`].
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// The state region could not be acquired before the configured deadline.
    #[error(
        "timed out waiting for lock on '{lock_file}' (operation: '{operation}', held by pid '{owner_pid}' at '{owner_address}', waiting as '{local_pid}')"
    )]
    LockTimeout {
        /// Path of the lock file that could not be acquired.
        lock_file: PathBuf,
        /// The operation name passed to `LockManager::lock`.
        operation: String,
        /// Owner pid discovered via the information region, or "unknown".
        owner_pid: String,
        /// Owner address discovered via the information region, or "unknown".
        owner_address: String,
        /// This process's own identifier.
        local_pid: String,
    },

    /// The protocol byte of a region did not match the expected constant.
    #[error("lock file '{0}' is corrupt: unexpected protocol byte in {1}")]
    CorruptLockFile(PathBuf, &'static str),

    /// `readFile`/`updateFile` called while the session's integrity flag is set.
    #[error("lock file '{0}' was left dirty by a previous writer; call write_file to recover")]
    FileIntegrityViolation(PathBuf),

    /// `updateFile`/`writeFile` called on a session that only holds a shared lock.
    #[error("operation requires an exclusive lock on '{0}', but the session only holds a shared lock")]
    InsufficientLockMode(PathBuf),

    /// A guarded operation was attempted after `close()`.
    #[error("lock session for '{0}' is closed")]
    ClosedLock(PathBuf),

    /// `LockManager::lock` was called with no requested mode.
    #[error("no lock mode requested for '{0}'")]
    UnsupportedMode(PathBuf),

    /// An unchecked OS/IO error occurred.
    #[error("internal lock error: {0}")]
    InternalLockError(String, #[source] std::io::Error),
}
