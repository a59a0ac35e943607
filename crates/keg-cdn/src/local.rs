use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{CdnError, Result};
use crate::source::{ByteStream, CdnSource};

/// Read-only view of a directory laid out like the CDN (`config/`, `data/`, ...).
#[derive(Clone, Debug)]
pub struct LocalCdn {
    base_dir: PathBuf,
}

impl LocalCdn {
    /// The directory is not created here; writers create it on first use.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a CDN path (`/data/ab/cd/abcd...`) onto the base directory.
    ///
    /// Paths that would escape the base directory are rejected.
    pub fn full_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut components = relative.components().peekable();
        if components.peek().is_none()
            || !components.all(|component| matches!(component, Component::Normal(_)))
        {
            return Err(CdnError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.base_dir.join(relative))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.full_path(path).is_ok_and(|full| full.is_file())
    }
}

impl CdnSource for LocalCdn {
    fn get_item(&self, path: &str) -> Result<ByteStream> {
        let full = self.full_path(path)?;
        match File::open(&full) {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(CdnError::NotFound { path: full })
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn full_path_strips_leading_slash() {
        let local = LocalCdn::new("/cache");
        assert_eq!(
            local.full_path("/data/ab/cd/abcd").unwrap(),
            Path::new("/cache/data/ab/cd/abcd")
        );
        assert_eq!(
            local.full_path("config/ab/cd/abcd").unwrap(),
            Path::new("/cache/config/ab/cd/abcd")
        );
    }

    #[test]
    fn full_path_rejects_escapes() {
        let local = LocalCdn::new("/cache");
        for path in ["", "/", "/data/../../etc/passwd", "./data"] {
            assert!(
                matches!(local.full_path(path), Err(CdnError::InvalidPath { .. })),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn exists_and_get_item() {
        let tmp = tempfile::tempdir().unwrap();
        let local = LocalCdn::new(tmp.path());
        assert!(!local.exists("/data/ab/cd/abcd"));

        let full = tmp.path().join("data/ab/cd/abcd");
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, b"cached").unwrap();
        assert!(local.exists("/data/ab/cd/abcd"));

        let mut out = Vec::new();
        local
            .get_item("/data/ab/cd/abcd")
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"cached");
    }

    #[test]
    fn missing_item_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let local = LocalCdn::new(tmp.path());
        match local.get_item("/data/ab/cd/abcd") {
            Err(CdnError::NotFound { path }) => {
                assert_eq!(path, tmp.path().join("data/ab/cd/abcd"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn construction_does_not_touch_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("objects");
        let _local = LocalCdn::new(&base);
        assert!(!base.exists());
    }
}
