use std::time::Duration;

/// Configuration for [`crate::LockManager`]. The only tunable is the
/// acquisition deadline; the 200 ms retry interval is a fixed constant (see
/// [`crate::region_lock::RETRY_INTERVAL`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct LockManagerConfig {
    /// How long `LockManager::lock` waits for the state region before
    /// raising `LockTimeout`, in milliseconds.
    pub lock_timeout_ms: u64,
}

impl LockManagerConfig {
    /// Default acquisition deadline: 60 seconds.
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;

    /// Returns the configured timeout as a [`Duration`].
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: Self::DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_sixty_seconds() {
        let config = LockManagerConfig::default();
        assert_eq!(config.lock_timeout(), Duration::from_secs(60));
    }

}
