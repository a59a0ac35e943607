use std::io;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{CdnError, Result};
use crate::hash::ContentHash;
use crate::psv::{self, PsvFile};
use crate::util::atomic_write;

/// A protocol response (e.g. a `versions` or `cdns` table) together with the digest it is
/// persisted under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatefulResponse {
    pub name: String,
    pub digest: String,
    pub content: Vec<u8>,
}

impl StatefulResponse {
    /// Digest is the SHA-256 hex of `content`.
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        let content = content.into();
        let digest = hex::encode(Sha256::digest(&content));
        Self {
            name: name.into(),
            digest,
            content,
        }
    }
}

/// Write-once store for snapshots of remote protocol state.
///
/// Entries live at `{cache_dir}/{name}/{digest[0:2]}/{digest[2:4]}/{digest}`. An entry is immutable
/// once written: writing it again is a no-op.
#[derive(Clone, Debug)]
pub struct StateCache {
    cache_dir: PathBuf,
}

impl StateCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn full_path(&self, name: &str, key: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        let single_segment = matches!(components.next(), Some(Component::Normal(_)))
            && components.next().is_none();
        if !single_segment {
            return Err(CdnError::InvalidPath {
                path: name.to_string(),
            });
        }
        let key = ContentHash::new(key)?;
        Ok(self.cache_dir.join(name).join(key.partition()))
    }

    pub fn exists(&self, name: &str, key: &str) -> bool {
        self.full_path(name, key).is_ok_and(|path| path.is_file())
    }

    pub fn read(&self, name: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.full_path(name, key)?;
        std::fs::read(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => CdnError::NotFound { path },
            _ => err.into(),
        })
    }

    pub fn read_to_string(&self, name: &str, key: &str) -> Result<String> {
        let bytes = self.read(name, key)?;
        String::from_utf8(bytes).map_err(|err| {
            CdnError::decode(format!("state cache entry {name}/{key} is not utf-8: {err}"))
        })
    }

    /// Read an entry and decode it as a pipe-separated table.
    pub fn read_psv(&self, name: &str, key: &str) -> Result<PsvFile> {
        psv::loads(&self.read_to_string(name, key)?)
    }

    /// Persist `content` under `(name, key)`.
    ///
    /// Returns the number of bytes written, or 0 when the entry already exists.
    pub fn write(&self, name: &str, key: &str, content: &[u8]) -> Result<usize> {
        let path = self.full_path(name, key)?;
        if path.is_file() {
            tracing::trace!(
                target: "keg.cdn",
                path = %path.display(),
                "state cache entry already present"
            );
            return Ok(0);
        }

        atomic_write(&path, content)?;
        tracing::debug!(
            target: "keg.cdn",
            path = %path.display(),
            bytes = content.len(),
            "wrote state cache entry"
        );
        Ok(content.len())
    }

    pub fn write_response(&self, response: &StatefulResponse) -> Result<usize> {
        self.write(&response.name, &response.digest, &response.content)
    }
}
