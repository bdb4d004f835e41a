//! Binary codec for the two fixed-offset regions of a lock file.
//!
//! ```text
//! [0]       state-region protocol (constant 1)
//! [1]       clean flag (0x00 dirty, 0x01 clean)
//! [2]       info-region protocol (constant 2), only meaningful if present
//! [3..]     length-prefixed pid, length-prefixed address
//! ```

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::LockError;

/// Protocol byte for the state region.
pub const STATE_REGION_PROTOCOL: u8 = 1;
/// Protocol byte for the information region.
pub const INFORMATION_REGION_PROTOCOL: u8 = 2;
/// Byte offset where the information region begins.
pub const INFORMATION_REGION_POS: u64 = 2;
/// Longest owner string the writer will emit; longer strings are truncated.
pub const MAX_STRING_LEN: usize = 340;

/// The parsed contents of the state region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRegion {
    /// Whether the previous exclusive holder completed a write-cycle.
    pub clean: bool,
}

/// The parsed contents of the information region.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnerInfo {
    /// Owner process identifier, or `"unknown"` if never written.
    pub pid: String,
    /// Owner port/address, or `"unknown"` if never written.
    pub address: String,
}

impl OwnerInfo {
    /// An owner info value meaning "no owner details recorded or found".
    pub fn unknown() -> Self {
        Self {
            pid: "unknown".to_string(),
            address: "unknown".to_string(),
        }
    }
}

/// Writes `[protocol, clean]` at the current file position (expected to be 0).
pub fn write_state<F: Write>(file: &mut F, clean: bool) -> std::io::Result<()> {
    file.write_all(&[STATE_REGION_PROTOCOL, u8::from(clean)])
}

/// Reads the state region. A file shorter than 2 bytes is treated as the
/// previous writer having crashed mid-write, and is reported as dirty rather
/// than an error.
pub fn read_state<F: Read + Seek>(
    file: &mut F,
    lock_file: &Path,
) -> Result<StateRegion, LockError> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| LockError::InternalLockError("failed to seek to state region".into(), e))?;

    let mut buf = [0u8; 2];
    match read_exact_or_eof(file, &mut buf)? {
        0 => Ok(StateRegion { clean: false }),
        n if n < 2 => Ok(StateRegion { clean: false }),
        _ => {
            if buf[0] != STATE_REGION_PROTOCOL {
                return Err(LockError::CorruptLockFile(
                    lock_file.to_path_buf(),
                    "state region",
                ));
            }
            Ok(StateRegion { clean: buf[1] != 0 })
        }
    }
}

/// Writes `(pid, address)` into the information region and truncates the file
/// to discard any stale trailing bytes from a previous, longer write.
///
/// Takes a concrete `fs_err::File` rather than a generic `Write + Seek` bound
/// because the trailing truncation needs `File::set_len`, which is an
/// inherent method, not part of either trait.
pub fn write_info(file: &fs_err::File, pid: &str, address: &str) -> std::io::Result<()> {
    let mut file = file;
    file.seek(SeekFrom::Start(INFORMATION_REGION_POS))?;
    file.write_all(&[INFORMATION_REGION_PROTOCOL])?;
    write_length_prefixed(&mut file, pid)?;
    write_length_prefixed(&mut file, address)?;
    file.flush()?;
    let end = file.stream_position()?;
    file.set_len(end)?;
    Ok(())
}

/// Reads `(pid, address)` from the information region. Returns `"unknown"`
/// for both fields when the file is too short to contain them.
pub fn read_info<F: Read + Seek>(
    file: &mut F,
    lock_file: &Path,
) -> Result<OwnerInfo, LockError> {
    let len = file
        .seek(SeekFrom::End(0))
        .map_err(|e| LockError::InternalLockError("failed to seek to file end".into(), e))?;
    if len < INFORMATION_REGION_POS + 1 {
        return Ok(OwnerInfo::unknown());
    }

    file.seek(SeekFrom::Start(INFORMATION_REGION_POS))
        .map_err(|e| LockError::InternalLockError("failed to seek to info region".into(), e))?;
    let mut protocol = [0u8; 1];
    file.read_exact(&mut protocol)
        .map_err(|e| LockError::InternalLockError("failed to read info protocol".into(), e))?;
    if protocol[0] != INFORMATION_REGION_PROTOCOL {
        return Err(LockError::CorruptLockFile(
            lock_file.to_path_buf(),
            "information region",
        ));
    }

    let pid = read_length_prefixed(file)
        .map_err(|e| LockError::InternalLockError("failed to read owner pid".into(), e))?;
    let address = read_length_prefixed(file)
        .map_err(|e| LockError::InternalLockError("failed to read owner address".into(), e))?;
    Ok(OwnerInfo { pid, address })
}

fn write_length_prefixed<F: Write>(file: &mut F, s: &str) -> std::io::Result<()> {
    let truncated: String = s.chars().take(MAX_STRING_LEN).collect();
    let bytes = truncated.as_bytes();
    #[allow(
        clippy::cast_possible_truncation,
        reason = "truncated to MAX_STRING_LEN chars, well under u16::MAX bytes"
    )]
    let len = bytes.len() as u16;
    file.write_all(&len.to_be_bytes())?;
    file.write_all(bytes)
}

fn read_length_prefixed<F: Read>(file: &mut F) -> std::io::Result<String> {
    let mut len_buf = [0u8; 2];
    file.read_exact(&mut len_buf)?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Like `read_exact` but returns the number of bytes actually read instead of
/// erroring on a short/empty read, since a truncated state region is a
/// meaningful ("dirty") result rather than a failure.
fn read_exact_or_eof<F: Read>(file: &mut F, buf: &mut [u8]) -> Result<usize, LockError> {
    let mut read = 0;
    while read < buf.len() {
        match file.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(LockError::InternalLockError(
                    "failed to read state region".into(),
                    e,
                ))
            }
        }
    }
    Ok(read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn temp_lock_file() -> (tempfile::TempDir, fs_err::File) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("x.lock");
        let file = fs_err::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .expect("open lock file");
        (dir, file)
    }

    #[test]
    fn state_round_trip_clean() {
        let mut buf = Cursor::new(Vec::new());
        write_state(&mut buf, true).expect("write");
        let state = read_state(&mut buf, Path::new("x.lock")).expect("read");
        assert!(state.clean);
    }

    #[test]
    fn state_round_trip_dirty() {
        let mut buf = Cursor::new(Vec::new());
        write_state(&mut buf, false).expect("write");
        let state = read_state(&mut buf, Path::new("x.lock")).expect("read");
        assert!(!state.clean);
    }

    #[test]
    fn empty_state_region_is_dirty() {
        let mut buf = Cursor::new(Vec::new());
        let state = read_state(&mut buf, Path::new("x.lock")).expect("read");
        assert!(!state.clean);
    }

    #[test]
    fn truncated_one_byte_state_region_is_dirty() {
        let mut buf = Cursor::new(vec![STATE_REGION_PROTOCOL]);
        let state = read_state(&mut buf, Path::new("x.lock")).expect("read");
        assert!(!state.clean);
    }

    #[test]
    fn bad_state_protocol_is_corrupt() {
        let mut buf = Cursor::new(vec![0xff, 0x01]);
        let err = read_state(&mut buf, Path::new("x.lock")).expect_err("should be corrupt");
        assert_matches!(err, LockError::CorruptLockFile(_, "state region"));
    }

    #[test]
    fn info_round_trip() {
        let (_dir, file) = temp_lock_file();
        write_info(&file, "pid-123", "127.0.0.1:9999").expect("write");
        let mut reader = &file;
        let info = read_info(&mut reader, Path::new("x.lock")).expect("read");
        assert_eq!(info.pid, "pid-123");
        assert_eq!(info.address, "127.0.0.1:9999");
    }

    #[test]
    fn info_round_trip_empty_strings() {
        let (_dir, file) = temp_lock_file();
        write_info(&file, "", "").expect("write");
        let mut reader = &file;
        let info = read_info(&mut reader, Path::new("x.lock")).expect("read");
        assert_eq!(info.pid, "");
        assert_eq!(info.address, "");
    }

    #[test]
    fn info_truncates_long_strings() {
        let (_dir, file) = temp_lock_file();
        let long = "x".repeat(1000);
        write_info(&file, &long, &long).expect("write");
        let mut reader = &file;
        let info = read_info(&mut reader, Path::new("x.lock")).expect("read");
        assert_eq!(info.pid.chars().count(), MAX_STRING_LEN);
    }

    #[test]
    fn short_file_reads_as_unknown() {
        let (_dir, mut file) = temp_lock_file();
        file.write_all(&[0u8; 2]).expect("seed state region");
        let mut reader = &file;
        let info = read_info(&mut reader, Path::new("x.lock")).expect("read");
        assert_eq!(info.pid, "unknown");
        assert_eq!(info.address, "unknown");
    }

    #[test]
    fn write_info_truncates_stale_trailing_bytes() {
        let (_dir, file) = temp_lock_file();
        write_info(&file, "a-very-long-previous-owner-id", "10.0.0.1:1234").expect("write");
        let long_len = file.metadata().expect("stat").len();
        write_info(&file, "p", "a").expect("write shorter");
        assert!(file.metadata().expect("stat").len() < long_len);
        let mut reader = &file;
        let info = read_info(&mut reader, Path::new("x.lock")).expect("read");
        assert_eq!(info.pid, "p");
        assert_eq!(info.address, "a");
    }
}
