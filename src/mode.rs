/// The mode a caller requests when asking [`crate::LockManager`] for a lock.
/// Keeps the `None` state that the distilled spec allows as input (so a
/// caller building a request dynamically can pass it through and get a typed
/// `UnsupportedMode` error back) distinct from the effective [`LockMode`] a
/// session reports once acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedLockMode {
    /// No mode requested; always rejected with `UnsupportedMode`.
    None,
    /// A shared (reader) lock.
    Shared,
    /// An exclusive (writer) lock.
    Exclusive,
}

/// The effective mode a [`crate::LockSession`] holds, derived from what the
/// OS actually granted rather than from what was requested (see the "mode
/// reporting" open question in DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// A shared (reader) lock.
    Shared,
    /// An exclusive (writer) lock.
    Exclusive,
}

impl LockMode {
    /// Whether this mode permits mutating guarded operations.
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive)
    }
}
