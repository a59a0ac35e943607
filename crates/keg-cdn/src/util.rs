use crate::error::{CdnError, Result};
use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

/// Marker embedded in in-flight file names: `<dest>.keg_temp.<pid>.<counter>`.
///
/// A file carrying this marker never occupies a canonical cache name.
pub const TEMP_MARKER: &str = ".keg_temp";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[cfg(test)]
pub(crate) fn is_temp_file_name(name: &str) -> bool {
    name.contains(TEMP_MARKER)
}

/// Write `bytes` to `path` through a temp sibling and an atomic rename.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    atomic_write_with(path, |file| {
        file.write_all(bytes)?;
        Ok(())
    })
}

pub(crate) fn atomic_write_with(
    path: &Path,
    write: impl FnOnce(&mut fs::File) -> Result<()>,
) -> Result<()> {
    let parent = ensure_parent_dir(path)?;

    let (tmp_path, mut file) = open_unique_tmp_file(path, &parent)?;
    let write_result = (|| -> Result<()> {
        write(&mut file)?;
        file.sync_all()?;
        Ok(())
    })();
    if let Err(err) = write_result {
        drop(file);
        remove_file_best_effort(&tmp_path, "atomic_write_with.write_failed");
        return Err(err);
    }
    drop(file);

    promote_tmp_file(&tmp_path, path).map_err(CdnError::from)
}

/// Create the parent directory of `path` if needed and return it.
pub(crate) fn ensure_parent_dir(path: &Path) -> io::Result<PathBuf> {
    let Some(parent) = path.parent() else {
        return Err(io::Error::other("path has no parent"));
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };

    fs::create_dir_all(parent)?;
    Ok(parent.to_path_buf())
}

pub(crate) fn open_unique_tmp_file(dest: &Path, parent: &Path) -> io::Result<(PathBuf, fs::File)> {
    let file_name = dest
        .file_name()
        .ok_or_else(|| io::Error::other("destination path has no file name"))?;
    let pid = std::process::id();

    loop {
        let counter = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut tmp_name = file_name.to_os_string();
        tmp_name.push(format!("{TEMP_MARKER}.{pid}.{counter}"));
        let tmp_path = parent.join(tmp_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
        {
            Ok(file) => return Ok((tmp_path, file)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Rename a fully written temp file onto `dest`.
///
/// Readers of `dest` observe either the previous state or the complete new file. On failure the
/// temp file is removed.
pub(crate) fn promote_tmp_file(tmp_path: &Path, dest: &Path) -> io::Result<()> {
    const MAX_RENAME_ATTEMPTS: usize = 1024;
    let rename_result = (|| -> io::Result<()> {
        let mut attempts = 0usize;
        loop {
            match fs::rename(tmp_path, dest) {
                Ok(()) => return Ok(()),
                Err(err)
                    if cfg!(windows)
                        && (err.kind() == io::ErrorKind::AlreadyExists || dest.exists()) =>
                {
                    // Windows `rename` does not replace. Concurrent downloads of the same object
                    // race on `remove + rename`; retry until one of them lands.
                    match fs::remove_file(dest) {
                        Ok(()) => {}
                        Err(remove_err) if remove_err.kind() == io::ErrorKind::NotFound => {}
                        Err(remove_err) => return Err(remove_err),
                    }

                    attempts += 1;
                    if attempts >= MAX_RENAME_ATTEMPTS {
                        return Err(err);
                    }

                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    })();

    match rename_result {
        Ok(()) => {
            if let Some(parent) = dest.parent() {
                sync_dir_best_effort(parent, "promote_tmp_file.sync_parent_dir");
            }
            Ok(())
        }
        Err(err) => {
            remove_file_best_effort(tmp_path, "promote_tmp_file.rename_failed");
            Err(err)
        }
    }
}

pub(crate) fn remove_file_best_effort(path: &Path, reason: &'static str) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => true,
        Err(err) => {
            tracing::debug!(
                target: "keg.cdn",
                path = %path.display(),
                reason,
                error = %err,
                "failed to remove temporary file"
            );
            false
        }
    }
}

#[track_caller]
fn sync_dir_best_effort(dir: &Path, reason: &'static str) {
    #[cfg(unix)]
    static SYNC_DIR_ERROR_LOGGED: OnceLock<()> = OnceLock::new();

    #[cfg(unix)]
    {
        match fs::File::open(dir).and_then(|dir| dir.sync_all()) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                if SYNC_DIR_ERROR_LOGGED.set(()).is_ok() {
                    let loc = std::panic::Location::caller();
                    tracing::debug!(
                        target: "keg.cdn",
                        dir = %dir.display(),
                        reason,
                        file = loc.file(),
                        line = loc.line(),
                        error = %err,
                        "failed to sync directory (best effort)"
                    );
                }
            }
        }
    }

    #[cfg(not(unix))]
    let _ = (dir, reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parents_and_leaves_no_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("responses").join("ab").join("cd").join("abcd");

        atomic_write(&dest, b"payload").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"payload");

        for entry in fs::read_dir(dest.parent().unwrap()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!is_temp_file_name(&name), "left behind temp file {name:?}");
        }
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("abcd");

        let err = atomic_write_with(&dest, |file| {
            file.write_all(b"partial")?;
            Err(io::Error::other("disk full").into())
        })
        .unwrap_err();
        assert!(matches!(err, CdnError::Io(_)), "unexpected error: {err:?}");

        assert!(!dest.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn unique_temp_names_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("abcd");
        let (a, _fa) = open_unique_tmp_file(&dest, tmp.path()).unwrap();
        let (b, _fb) = open_unique_tmp_file(&dest, tmp.path()).unwrap();
        assert_ne!(a, b);
        assert!(is_temp_file_name(&a.file_name().unwrap().to_string_lossy()));
    }
}
