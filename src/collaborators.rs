//! External collaborator contracts (§4.A/B). Both are real, narrow traits so
//! this crate is usable and testable standalone; the host application wires
//! in its actual process-metadata and network-ping implementations.

use std::path::Path;

/// Supplies an identifier string for the current process, used to populate
/// the information region and to label error messages. Expected to be cheap
/// and stable for the lifetime of the process.
pub trait ProcessIdentifierProvider: Send + Sync {
    /// Returns the identifier for the current process.
    fn process_identifier(&self) -> String;
}

/// Best-effort "please release soon" signal sent to a suspected lock holder.
/// Implementations must not block for long and must not panic; failures are
/// logged and ignored by callers.
pub trait OwnerPingTransport: Send + Sync {
    /// Attempts to notify the owner at `address` that `target` is contended.
    fn ping_owner(&self, address: &str, target: &Path);
}

/// Default [`ProcessIdentifierProvider`] backed by the OS process id.
#[derive(Debug, Default, Clone, Copy)]
pub struct PidProcessIdentifier;

impl ProcessIdentifierProvider for PidProcessIdentifier {
    fn process_identifier(&self) -> String {
        std::process::id().to_string()
    }
}

/// [`OwnerPingTransport`] that only logs; the real ping transport (UDP/TCP)
/// is out of scope for this crate and is supplied by the host application.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPingTransport;

impl OwnerPingTransport for NoopPingTransport {
    fn ping_owner(&self, address: &str, target: &Path) {
        tracing::debug!(%address, target = %target.display(), "would ping lock owner (no-op transport)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_provider_returns_current_pid() {
        let provider = PidProcessIdentifier;
        assert_eq!(provider.process_identifier(), std::process::id().to_string());
    }
}
