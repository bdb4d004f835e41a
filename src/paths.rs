use std::path::{Path, PathBuf};

/// Computes the sidecar lock-file path for a target, per the path rule in §3:
/// a directory target locks `D/<basename(D)>.lock` inside itself, any other
/// target locks `<parent>/<basename>.lock` beside it.
pub fn lock_file_for(target: &Path) -> PathBuf {
    if target.is_dir() {
        let name = target
            .file_name()
            .map_or_else(|| "lock".to_string(), |n| n.to_string_lossy().into_owned());
        target.join(format!("{name}.lock"))
    } else {
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .map_or_else(|| "lock".to_string(), |n| n.to_string_lossy().into_owned());
        parent.join(format!("{name}.lock"))
    }
}

/// Canonicalises a target path for use as a stable map/log key. Falls back to
/// canonicalising the parent directory and re-appending the file name when the
/// target itself does not yet exist (a cache entry that hasn't been fetched).
pub fn canonicalize_target(target: &Path) -> std::io::Result<PathBuf> {
    match fs_err::canonicalize(target) {
        Ok(canonical) => Ok(canonical),
        Err(_) if target.parent().is_some() => {
            let parent = target.parent().unwrap_or_else(|| Path::new("."));
            let canonical_parent = fs_err::canonicalize(parent)?;
            Ok(match target.file_name() {
                Some(name) => canonical_parent.join(name),
                None => canonical_parent,
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_target_locks_beside_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("pkg-1.0.tar.bz2");
        fs_err::write(&target, b"data").expect("write target");
        assert_eq!(lock_file_for(&target), dir.path().join("pkg-1.0.tar.bz2.lock"));
    }

    #[test]
    fn directory_target_locks_inside_itself() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("extracted-pkg");
        fs_err::create_dir(&target).expect("mkdir");
        let expected = target.join("extracted-pkg.lock");
        assert_eq!(lock_file_for(&target), expected);
    }
}
