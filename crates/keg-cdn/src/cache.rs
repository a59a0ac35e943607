use std::path::PathBuf;

use crate::error::Result;
use crate::local::LocalCdn;
use crate::populate::CachePopulatingStream;
use crate::remote::{CdnDescriptor, RemoteCdn, RemoteOptions};
use crate::source::{ByteStream, CdnSource};

/// Read-through cache over a remote origin.
///
/// Hits are served straight from the local tree. Misses stream from the origin through a
/// [`CachePopulatingStream`], which publishes the object under the same relative path once the
/// download completes. Concurrent misses on one path each download independently; the last
/// rename wins and readers never see a partial file.
#[derive(Clone, Debug)]
pub struct CacheableCdn<R = RemoteCdn> {
    local: LocalCdn,
    remote: R,
}

impl CacheableCdn<RemoteCdn> {
    pub fn new(cdn: &CdnDescriptor, base_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(cdn, base_dir, RemoteOptions::default())
    }

    pub fn with_options(
        cdn: &CdnDescriptor,
        base_dir: impl Into<PathBuf>,
        options: RemoteOptions,
    ) -> Result<Self> {
        let remote = RemoteCdn::with_options(cdn, options)?;
        Ok(Self::with_remote(remote, base_dir))
    }
}

impl<R: CdnSource> CacheableCdn<R> {
    pub fn with_remote(remote: R, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            local: LocalCdn::new(base_dir),
            remote,
        }
    }

    pub fn local(&self) -> &LocalCdn {
        &self.local
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }
}

impl<R: CdnSource> CdnSource for CacheableCdn<R> {
    fn get_item(&self, path: &str) -> Result<ByteStream> {
        if self.local.exists(path) {
            tracing::trace!(target: "keg.cdn", path, "cache hit");
            return self.local.get_item(path);
        }

        let cache_path = self.local.full_path(path)?;
        tracing::debug!(target: "keg.cdn", path, "cache miss; fetching from remote");
        let remote = self.remote.get_item(path)?;
        Ok(Box::new(CachePopulatingStream::new(remote, cache_path)?))
    }
}
