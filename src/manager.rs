use std::path::Path;
use std::sync::Arc;

use crate::collaborators::{NoopPingTransport, OwnerPingTransport, PidProcessIdentifier, ProcessIdentifierProvider};
use crate::config::LockManagerConfig;
use crate::error::LockError;
use crate::mode::RequestedLockMode;
use crate::paths;
use crate::session::LockSession;

/// Stateless façade that canonicalises target paths and constructs
/// [`LockSession`]s. Cheap to clone; typically held once per process and
/// shared across call sites that need to lock caches.
#[derive(Clone)]
pub struct LockManager {
    pid_provider: Arc<dyn ProcessIdentifierProvider>,
    ping_transport: Arc<dyn OwnerPingTransport>,
    config: LockManagerConfig,
}

impl LockManager {
    /// Builds a manager with the given collaborators and configuration.
    pub fn new(
        pid_provider: Arc<dyn ProcessIdentifierProvider>,
        ping_transport: Arc<dyn OwnerPingTransport>,
        config: LockManagerConfig,
    ) -> Self {
        Self {
            pid_provider,
            ping_transport,
            config,
        }
    }

    /// The configured acquisition timeout.
    pub fn config(&self) -> LockManagerConfig {
        self.config
    }

    /// Acquires a lock on `target` in the requested `mode`.
    ///
    /// `target` is canonicalised first (falling back to canonicalising its
    /// parent directory if the target itself does not yet exist). `port` is
    /// written into the information region so other waiters can discover how
    /// to reach this process.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::UnsupportedMode`] if `mode` is
    /// [`RequestedLockMode::None`], [`LockError::LockTimeout`] if the state
    /// region cannot be acquired before the deadline, or
    /// [`LockError::CorruptLockFile`] if an existing lock file fails
    /// protocol validation.
    pub fn lock(
        &self,
        target: impl AsRef<Path>,
        mode: RequestedLockMode,
        display_name: impl Into<String>,
        operation_display_name: impl Into<String>,
        port: u16,
    ) -> Result<LockSession, LockError> {
        let target = target.as_ref();
        let canonical = paths::canonicalize_target(target).map_err(|e| {
            LockError::InternalLockError(
                format!("failed to canonicalise target '{}'", target.display()),
                e,
            )
        })?;

        LockSession::acquire(
            canonical,
            mode,
            display_name.into(),
            operation_display_name.into(),
            port,
            &self.config,
            self.pid_provider.as_ref(),
            self.ping_transport.as_ref(),
        )
    }
}

impl Default for LockManager {
    /// A manager backed by `std::process::id()` for process identification
    /// and a no-op ping transport, with the default 60 second timeout.
    fn default() -> Self {
        Self::new(
            Arc::new(PidProcessIdentifier),
            Arc::new(NoopPingTransport),
            LockManagerConfig::default(),
        )
    }
}
