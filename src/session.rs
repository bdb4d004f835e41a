use std::fmt::{Debug, Formatter};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::codec::{self, OwnerInfo, INFORMATION_REGION_POS};
use crate::collaborators::{OwnerPingTransport, ProcessIdentifierProvider};
use crate::config::LockManagerConfig;
use crate::error::LockError;
use crate::mode::{LockMode, RequestedLockMode};
use crate::paths;
use crate::region_lock::{self, RegionLock};

/// Size of the information region: up to 2046 bytes starting at offset 2,
/// for a 2048-byte lock file as specified in §3.
const INFORMATION_REGION_LEN: u64 = 2046;
/// Size of the state region: bytes `[0, 2)`.
const STATE_REGION_LEN: u64 = INFORMATION_REGION_POS;

/// An error raised by the write-cycle wrapped by [`LockSession::update_file`]
/// and [`LockSession::write_file`]: either a precondition failure from the
/// lock itself, or the caller-supplied action's own error.
#[derive(Debug, thiserror::Error)]
pub enum WriteCycleError {
    /// A lock precondition (open/integral/mode) was not met.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// The caller-supplied action returned an error; the lock file is left
    /// dirty and the next `read_file`/`update_file` call will observe
    /// `FileIntegrityViolation`.
    #[error(transparent)]
    Action(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// One acquired lock's lifetime: from successful acquisition (via
/// [`crate::LockManager::lock`]) through [`LockSession::close`].
///
/// Not thread-safe: every guarded operation takes `&mut self`, matching the
/// spec's requirement that callers externally serialise access to a single
/// session.
pub struct LockSession {
    target: PathBuf,
    lock_file: PathBuf,
    mode: LockMode,
    file: Option<fs_err::File>,
    state_lock: Option<RegionLock>,
    integrity_violated: bool,
    unlocked_cleanly: bool,
    owner_display_name: String,
    owner_operation_display_name: String,
    owner_port: u16,
    contended: bool,
    busy: bool,
}

impl Debug for LockSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSession")
            .field("target", &self.target)
            .field("lock_file", &self.lock_file)
            .field("mode", &self.mode)
            .field("integrity_violated", &self.integrity_violated)
            .field("closed", &self.file.is_none())
            .finish()
    }
}

impl LockSession {
    /// Runs the acquisition protocol of §4.E and returns a held session.
    #[allow(clippy::too_many_arguments, reason = "mirrors the language-neutral LockManager.lock signature")]
    pub(crate) fn acquire(
        target: PathBuf,
        requested: RequestedLockMode,
        display_name: String,
        operation_display_name: String,
        port: u16,
        config: &LockManagerConfig,
        pid_provider: &dyn ProcessIdentifierProvider,
        ping_transport: &dyn OwnerPingTransport,
    ) -> Result<Self, LockError> {
        let shared_request = match requested {
            RequestedLockMode::None => return Err(LockError::UnsupportedMode(target)),
            RequestedLockMode::Shared => true,
            RequestedLockMode::Exclusive => false,
        };

        let lock_file = paths::lock_file_for(&target);
        if let Some(parent) = lock_file.parent() {
            fs_err::create_dir_all(parent).map_err(|e| {
                LockError::InternalLockError(
                    format!(
                        "failed to create parent directory for '{}'",
                        lock_file.display()
                    ),
                    e,
                )
            })?;
        }

        let file = fs_err::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_file)
            .map_err(|e| {
                LockError::InternalLockError(
                    format!("failed to open lock file '{}'", lock_file.display()),
                    e,
                )
            })?;

        let deadline = Instant::now() + config.lock_timeout();
        let local_pid = pid_provider.process_identifier();

        let mut last_owner = OwnerInfo::unknown();
        let state_lock_result = {
            let on_retry = || {
                Self::discover_and_ping_owner(&file, &lock_file, &target, ping_transport, &mut last_owner);
            };
            region_lock::lock_region(&file, shared_request, 0, STATE_REGION_LEN, deadline, on_retry)
        };

        let state_lock = match state_lock_result {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                return Err(LockError::LockTimeout {
                    lock_file,
                    operation: operation_display_name,
                    owner_pid: last_owner.pid,
                    owner_address: last_owner.address,
                    local_pid,
                });
            }
            Err(e) => {
                return Err(LockError::InternalLockError(
                    format!(
                        "failed to acquire state region lock on '{}'",
                        lock_file.display()
                    ),
                    e,
                ));
            }
        };

        let mut reader = &file;
        let initial_state = codec::read_state(&mut reader, &lock_file)?;
        let mode = if state_lock.is_shared() {
            LockMode::Shared
        } else {
            LockMode::Exclusive
        };

        if mode.is_exclusive() {
            let file_len = file
                .metadata()
                .map_err(|e| {
                    LockError::InternalLockError(
                        format!("failed to stat lock file '{}'", lock_file.display()),
                        e,
                    )
                })?
                .len();
            if file_len < INFORMATION_REGION_POS {
                let mut writer = &file;
                writer.seek(SeekFrom::Start(0)).and_then(|_| codec::write_state(&mut writer, false)).map_err(|e| {
                    LockError::InternalLockError(
                        format!("failed to initialise state region of '{}'", lock_file.display()),
                        e,
                    )
                })?;
            }

            let info_lock = region_lock::lock_region(
                &file,
                false,
                INFORMATION_REGION_POS,
                INFORMATION_REGION_LEN,
                deadline,
                || {},
            )
            .map_err(|e| {
                LockError::InternalLockError(
                    format!(
                        "failed to acquire information region lock on '{}'",
                        lock_file.display()
                    ),
                    e,
                )
            })?
            .ok_or_else(|| {
                LockError::InternalLockError(
                    format!(
                        "timed out acquiring information region lock on '{}'",
                        lock_file.display()
                    ),
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "information region lock timeout"),
                )
            })?;

            codec::write_info(&file, &local_pid, &port.to_string()).map_err(|e| {
                LockError::InternalLockError(
                    format!("failed to write owner info to '{}'", lock_file.display()),
                    e,
                )
            })?;
            drop(info_lock);
        }

        let integrity_violated = !initial_state.clean;

        Ok(Self {
            target,
            lock_file,
            mode,
            file: Some(file),
            state_lock: Some(state_lock),
            integrity_violated,
            unlocked_cleanly: !integrity_violated,
            owner_display_name: display_name,
            owner_operation_display_name: operation_display_name,
            owner_port: port,
            contended: false,
            busy: false,
        })
    }

    /// The retry hook passed to the state-region `lock_region` loop: peeks at
    /// the information region under a short shared lock, logs the discovered
    /// owner, and pings them if an address is known.
    fn discover_and_ping_owner(
        file: &fs_err::File,
        lock_file: &Path,
        target: &Path,
        ping_transport: &dyn OwnerPingTransport,
        last_owner: &mut OwnerInfo,
    ) {
        let info_lock = match region_lock::lock_region(
            file,
            true,
            INFORMATION_REGION_POS,
            INFORMATION_REGION_LEN,
            Instant::now(),
            || {},
        ) {
            Ok(Some(lock)) => lock,
            _ => return,
        };

        let mut reader = file;
        if let Ok(info) = codec::read_info(&mut reader, lock_file) {
            tracing::info!(
                owner_pid = %info.pid,
                owner_address = %info.address,
                lock_file = %lock_file.display(),
                "waiting for file lock"
            );
            if info.address != "unknown" {
                ping_transport.ping_owner(&info.address, target);
            }
            *last_owner = info;
        }
        drop(info_lock);
    }

    /// The target path this session protects.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The path of the sidecar lock file.
    pub fn lock_file(&self) -> &Path {
        &self.lock_file
    }

    /// The effective mode this session holds, derived from the OS lock
    /// actually granted rather than the mode requested.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Whether `path` is the lock file belonging to this session.
    pub fn is_lock_file(&self, path: &Path) -> bool {
        path == self.lock_file
    }

    /// Whether the previous exclusive holder completed a write-cycle before
    /// this session acquired the lock. Fixed at acquisition time.
    pub fn unlocked_cleanly(&self) -> bool {
        self.unlocked_cleanly
    }

    /// The display name supplied by the caller that acquired this session.
    pub fn display_name(&self) -> &str {
        &self.owner_display_name
    }

    /// The operation display name supplied by the caller.
    pub fn operation_display_name(&self) -> &str {
        &self.owner_operation_display_name
    }

    /// The port written into the information region for peer discovery.
    pub fn owner_port(&self) -> u16 {
        self.owner_port
    }

    /// Marks this session as contended by another waiter, for diagnostics.
    pub fn set_contended(&mut self, value: bool) {
        self.contended = value;
    }

    /// Whether this session has been marked contended.
    pub fn is_contended(&self) -> bool {
        self.contended
    }

    /// Marks this session as busy performing a guarded operation, for
    /// diagnostics.
    pub fn set_busy(&mut self, value: bool) {
        self.busy = value;
    }

    /// Whether this session has been marked busy.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Reads the guarded target under this session's lock. No mode
    /// restriction: callers may read under either shared or exclusive.
    pub fn read_file<T>(&self, producer: impl FnOnce() -> T) -> Result<T, LockError> {
        self.assert_integral()?;
        Ok(producer())
    }

    /// Runs a write-cycle, requiring the session to already be known clean
    /// (`!integrity_violated`). Use [`Self::write_file`] to recover from a
    /// previously dirty lock.
    pub fn update_file<T, E>(
        &mut self,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, WriteCycleError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.assert_integral()?;
        self.assert_exclusive()?;
        self.write_cycle(action)
    }

    /// Runs a write-cycle regardless of the session's current integrity
    /// state; this is the recovery entry point after a crash left the lock
    /// file dirty.
    pub fn write_file<T, E>(
        &mut self,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, WriteCycleError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.assert_open()?;
        self.assert_exclusive()?;
        self.write_cycle(action)
    }

    fn write_cycle<T, E>(
        &mut self,
        action: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, WriteCycleError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.integrity_violated = true;
        self.mark_dirty()?;
        match action() {
            Ok(value) => {
                self.mark_clean()?;
                self.integrity_violated = false;
                Ok(value)
            }
            Err(e) => Err(WriteCycleError::Action(Box::new(e))),
        }
    }

    /// Idempotent release. Truncates the lock file back to the information
    /// region boundary if this session held an exclusive lock, then closes
    /// the OS handle (which releases the region locks). IO errors are
    /// logged and swallowed; this method never fails.
    pub fn close(&mut self) {
        let Some(mut file) = self.file.take() else {
            return;
        };

        if self.mode.is_exclusive() {
            if let Err(e) = file.set_len(INFORMATION_REGION_POS) {
                tracing::warn!(
                    lock_file = %self.lock_file.display(),
                    "failed to truncate lock file on close: {e}"
                );
            }
        }

        self.state_lock = None;
        drop(file);
    }

    fn assert_open(&self) -> Result<(), LockError> {
        if self.file.is_none() {
            return Err(LockError::ClosedLock(self.lock_file.clone()));
        }
        Ok(())
    }

    fn assert_integral(&self) -> Result<(), LockError> {
        self.assert_open()?;
        if self.integrity_violated {
            return Err(LockError::FileIntegrityViolation(self.lock_file.clone()));
        }
        Ok(())
    }

    fn assert_exclusive(&self) -> Result<(), LockError> {
        if !self.mode.is_exclusive() {
            return Err(LockError::InsufficientLockMode(self.lock_file.clone()));
        }
        Ok(())
    }

    fn mark_dirty(&mut self) -> Result<(), LockError> {
        self.write_state_flag(false)
    }

    fn mark_clean(&mut self) -> Result<(), LockError> {
        self.write_state_flag(true)
    }

    fn write_state_flag(&mut self, clean: bool) -> Result<(), LockError> {
        let lock_file = self.lock_file.clone();
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| LockError::ClosedLock(lock_file.clone()))?;
        file.seek(SeekFrom::Start(0))
            .and_then(|_| codec::write_state(file, clean))
            .and_then(|()| file.flush())
            .map_err(|e| {
                LockError::InternalLockError(
                    format!("failed to update state region of '{}'", lock_file.display()),
                    e,
                )
            })
    }
}

impl Drop for LockSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::collaborators::{NoopPingTransport, PidProcessIdentifier};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn acquire(
        target: &Path,
        mode: RequestedLockMode,
        timeout_ms: u64,
    ) -> Result<LockSession, LockError> {
        let config = LockManagerConfig {
            lock_timeout_ms: timeout_ms,
        };
        LockSession::acquire(
            target.to_path_buf(),
            mode,
            "test".to_string(),
            "unit-test".to_string(),
            0,
            &config,
            &PidProcessIdentifier,
            &NoopPingTransport,
        )
    }

    #[test]
    fn clean_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");

        let mut session = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
        assert_eq!(session.mode(), LockMode::Exclusive);
        session
            .write_file::<(), std::io::Error>(|| Ok(()))
            .expect("write cycle");
        session.close();

        let lock_file = session.lock_file().to_path_buf();
        let bytes = fs_err::read(&lock_file).expect("read lock file");
        assert_eq!(bytes, vec![0x01, 0x01]);

        let session2 = acquire(&target, RequestedLockMode::Shared, 1_000).expect("acquire shared");
        assert!(session2.unlocked_cleanly());
    }

    #[test]
    fn crash_recovery() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");

        let mut session = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
        let result = session.write_file::<(), _>(|| {
            Err::<(), _>(std::io::Error::other("boom"))
        });
        assert!(result.is_err());
        session.close();

        let mut session2 = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire 2");
        assert!(!session2.unlocked_cleanly());
        let read_result = session2.read_file(|| 42);
        assert_matches!(read_result, Err(LockError::FileIntegrityViolation(_)));

        session2
            .write_file::<(), std::io::Error>(|| Ok(()))
            .expect("recovery write");
        assert_eq!(session2.read_file(|| 42).expect("read after recovery"), 42);
    }

    #[test]
    fn shared_session_rejects_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");
        {
            let mut setup = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
            setup
                .write_file::<(), std::io::Error>(|| Ok(()))
                .expect("init clean");
        }

        let mut session = acquire(&target, RequestedLockMode::Shared, 1_000).expect("acquire shared");
        assert_matches!(
            session.update_file::<(), std::io::Error>(|| Ok(())),
            Err(WriteCycleError::Lock(LockError::InsufficientLockMode(_)))
        );
        assert_matches!(
            session.write_file::<(), std::io::Error>(|| Ok(())),
            Err(WriteCycleError::Lock(LockError::InsufficientLockMode(_)))
        );
        assert_eq!(session.read_file(|| "ok").expect("read"), "ok");
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");
        let mut session = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
        session.close();
        session.close();
        session.close();
        assert_matches!(session.read_file(|| ()), Err(LockError::ClosedLock(_)));
    }

    #[test]
    fn close_truncates_exclusive_lock_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");
        let mut session = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
        session
            .write_file::<(), std::io::Error>(|| Ok(()))
            .expect("write");
        let lock_file = session.lock_file().to_path_buf();
        session.close();
        let len = fs_err::metadata(&lock_file).expect("stat").len();
        assert_eq!(len, 2);
    }

    #[test]
    fn directory_target_locks_inside_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("extracted");
        fs_err::create_dir(&target).expect("mkdir");
        let session = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
        assert_eq!(session.lock_file(), target.join("extracted.lock"));
    }

    #[test]
    fn retry_hook_discovers_and_pings_owner() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("t");

        let mut holder = acquire(&target, RequestedLockMode::Exclusive, 1_000).expect("acquire");
        holder
            .write_file::<(), std::io::Error>(|| Ok(()))
            .expect("write");

        struct RecordingPinger(Arc<AtomicUsize>);
        impl OwnerPingTransport for RecordingPinger {
            fn ping_owner(&self, _address: &str, _target: &Path) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let pings = Arc::new(AtomicUsize::new(0));
        let config = LockManagerConfig {
            lock_timeout_ms: 450,
        };
        let result = LockSession::acquire(
            target.clone(),
            RequestedLockMode::Exclusive,
            "waiter".to_string(),
            "contend".to_string(),
            0,
            &config,
            &PidProcessIdentifier,
            &RecordingPinger(pings.clone()),
        );

        assert_matches!(result, Err(LockError::LockTimeout { .. }));
        assert!(pings.load(Ordering::SeqCst) >= 1);
        holder.close();
    }
}
