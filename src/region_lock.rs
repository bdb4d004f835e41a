//! OS-level advisory byte-range locking on a single open file.
//!
//! Unlike [`fs4`]'s whole-file `lock_exclusive`/`lock_shared`, the state and
//! information regions of a lock file must be independently lockable, so this
//! module talks to the platform record-locking API directly: POSIX `fcntl`
//! advisory record locks on Unix (preferring Linux's open-file-description
//! variant so two handles in the same process still contend, the way `flock`
//! does), and `LockFileEx`/`UnlockFileEx` with an explicit byte range on
//! Windows.

use std::io;
use std::time::{Duration, Instant};

use fs_err::File;

/// Fixed delay between failed try-lock attempts, per the acquisition
/// algorithm in §4.D.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// An OS-level lock held on `[start, start + len)` of a file. Unlocked on
/// drop.
pub struct RegionLock {
    raw: sys::RawHandle,
    start: u64,
    len: u64,
    pub(crate) shared: bool,
}

impl RegionLock {
    /// Attempts to acquire the region lock once, without blocking. Returns
    /// `Ok(None)` on contention, `Err` on any other failure.
    fn try_acquire(file: &File, shared: bool, start: u64, len: u64) -> io::Result<Option<Self>> {
        let raw = sys::raw_handle(file);
        match sys::try_lock(raw, shared, start, len) {
            Ok(()) => Ok(Some(Self {
                raw,
                start,
                len,
                shared,
            })),
            Err(e) if sys::is_contended(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether this lock was granted in shared mode.
    pub(crate) fn is_shared(&self) -> bool {
        self.shared
    }
}

impl Drop for RegionLock {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(self.raw, self.start, self.len) {
            tracing::warn!("failed to release region lock: {e}");
        }
    }
}

/// Repeatedly tries to lock `[start, start + len)` of `file` until it
/// succeeds or `deadline` passes, calling `on_retry` and sleeping
/// [`RETRY_INTERVAL`] between attempts. Returns `None` on deadline expiry.
pub fn lock_region(
    file: &File,
    shared: bool,
    start: u64,
    len: u64,
    deadline: Instant,
    mut on_retry: impl FnMut(),
) -> io::Result<Option<RegionLock>> {
    loop {
        if let Some(lock) = RegionLock::try_acquire(file, shared, start, len)? {
            return Ok(Some(lock));
        }
        on_retry();
        if Instant::now() >= deadline {
            return Ok(None);
        }
        std::thread::sleep(RETRY_INTERVAL);
        if Instant::now() >= deadline {
            // One last attempt right at the deadline, matching "one try-lock
            // attempt, then failure" for a zero-timeout caller.
            return Ok(RegionLock::try_acquire(file, shared, start, len)?);
        }
    }
}

#[cfg(unix)]
mod sys {
    use super::io;
    use fs_err::File;
    use std::mem;
    use std::os::unix::io::{AsRawFd, RawFd};

    pub(super) type RawHandle = RawFd;

    pub(super) fn raw_handle(file: &File) -> RawHandle {
        file.as_raw_fd()
    }

    #[cfg(target_os = "linux")]
    const SETLK: libc::c_int = libc::F_OFD_SETLK;
    #[cfg(not(target_os = "linux"))]
    const SETLK: libc::c_int = libc::F_SETLK;

    fn flock_for(l_type: libc::c_short, start: u64, len: u64) -> libc::flock {
        let mut fl: libc::flock = unsafe { mem::zeroed() };
        fl.l_type = l_type;
        fl.l_whence = libc::SEEK_SET as libc::c_short;
        #[allow(
            clippy::cast_possible_wrap,
            reason = "region offsets are small and well within i64 range"
        )]
        {
            fl.l_start = start as libc::off_t;
            fl.l_len = len as libc::off_t;
        }
        fl
    }

    fn fcntl_lock(fd: RawFd, l_type: libc::c_short, start: u64, len: u64) -> io::Result<()> {
        let fl = flock_for(l_type, start, len);
        let ret = unsafe { libc::fcntl(fd, SETLK, &fl) };
        if ret == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(super) fn try_lock(fd: RawHandle, shared: bool, start: u64, len: u64) -> io::Result<()> {
        let l_type = if shared { libc::F_RDLCK } else { libc::F_WRLCK };
        fcntl_lock(fd, l_type as libc::c_short, start, len)
    }

    pub(super) fn unlock(fd: RawHandle, start: u64, len: u64) -> io::Result<()> {
        fcntl_lock(fd, libc::F_UNLCK as libc::c_short, start, len)
    }

    pub(super) fn is_contended(err: &io::Error) -> bool {
        matches!(
            err.raw_os_error(),
            Some(libc::EAGAIN) | Some(libc::EACCES)
        )
    }
}

#[cfg(windows)]
mod sys {
    use super::io;
    use fs_err::File;
    use std::os::windows::io::{AsRawHandle, RawHandle as StdRawHandle};
    use windows_sys::Win32::Foundation::{ERROR_IO_PENDING, ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LockFileEx, UnlockFile, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
    };

    pub(super) type RawHandle = isize;

    pub(super) fn raw_handle(file: &File) -> RawHandle {
        file.as_raw_handle() as isize
    }

    fn split(value: u64) -> (u32, u32) {
        #[allow(clippy::cast_possible_truncation, reason = "intentional 32-bit split")]
        ((value & 0xFFFF_FFFF) as u32, (value >> 32) as u32)
    }

    pub(super) fn try_lock(handle: RawHandle, shared: bool, start: u64, len: u64) -> io::Result<()> {
        let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
        if !shared {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        let (start_low, start_high) = split(start);
        let (len_low, len_high) = split(len);
        unsafe {
            let mut overlapped: windows_sys::Win32::System::IO::OVERLAPPED = std::mem::zeroed();
            overlapped.Anonymous.Anonymous.Offset = start_low;
            overlapped.Anonymous.Anonymous.OffsetHigh = start_high;
            let ret = LockFileEx(
                handle as HANDLE,
                flags,
                0,
                len_low,
                len_high,
                &mut overlapped,
            );
            if ret == 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    pub(super) fn unlock(handle: RawHandle, start: u64, len: u64) -> io::Result<()> {
        let (start_low, start_high) = split(start);
        let (len_low, len_high) = split(len);
        unsafe {
            let ret = UnlockFile(handle as HANDLE, start_low, start_high, len_low, len_high);
            if ret == 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        }
    }

    pub(super) fn is_contended(err: &io::Error) -> bool {
        err.raw_os_error()
            .is_some_and(|x| x == ERROR_LOCK_VIOLATION as i32 || x == ERROR_IO_PENDING as i32)
    }
}
