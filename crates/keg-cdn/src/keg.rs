use std::io;
use std::path::{Component, Path, PathBuf};

use keg_config::{KegConfig, CONFIG_FILENAME};

use crate::cache::CacheableCdn;
use crate::error::{CdnError, Result};
use crate::local::LocalCdn;
use crate::remote::{CdnDescriptor, RemoteOptions};
use crate::state_cache::StateCache;

/// Raw decryption key bytes loaded from `armadillo/{name}.ak`.
///
/// Decoding the key material is left to the decryption layer.
#[derive(Clone, PartialEq, Eq)]
pub struct DecryptionKey {
    name: String,
    bytes: Vec<u8>,
}

impl DecryptionKey {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for DecryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionKey")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A keg directory: the on-disk home of cached CDN objects, protocol state and configuration.
///
/// ```text
/// <root>/
///   keg.conf
///   objects/{config,data,patch}/<h[0:2]>/<h[2:4]>/<h>[.index]
///   fragments/
///   responses/<name>/<d[0:2]>/<d[2:4]>/<d>
///   armadillo/<key>.ak
/// ```
#[derive(Clone, Debug)]
pub struct Keg {
    path: PathBuf,
    objects_path: PathBuf,
    fragments_path: PathBuf,
    responses_path: PathBuf,
    armadillo_path: PathBuf,
    config_path: PathBuf,
    config: KegConfig,
    state_cache: StateCache,
}

impl Keg {
    /// Open the keg at `path`. Nothing is created until [`Keg::initialize`].
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        let responses_path = path.join("responses");
        let config_path = path.join(CONFIG_FILENAME);
        let config = KegConfig::load_or_default(&config_path)?;

        Ok(Self {
            objects_path: path.join("objects"),
            fragments_path: path.join("fragments"),
            armadillo_path: path.join("armadillo"),
            state_cache: StateCache::new(&responses_path),
            responses_path,
            config_path,
            config,
            path,
        })
    }

    /// Create the keg root and a default `keg.conf` if missing.
    ///
    /// Returns `true` when the root directory did not exist before.
    pub fn initialize(&mut self) -> Result<bool> {
        let created = match std::fs::create_dir(&self.path) {
            Ok(()) => true,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => false,
            Err(err) => return Err(err.into()),
        };
        KegConfig::initialize(&self.config_path)?;
        self.config = KegConfig::load_from_path(&self.config_path)?;

        tracing::info!(
            target: "keg.cdn",
            path = %self.path.display(),
            created,
            "initialized keg"
        );
        Ok(created)
    }

    pub fn is_initialized(&self) -> bool {
        self.path.is_dir()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn objects_path(&self) -> &Path {
        &self.objects_path
    }

    pub fn fragments_path(&self) -> &Path {
        &self.fragments_path
    }

    pub fn responses_path(&self) -> &Path {
        &self.responses_path
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config(&self) -> &KegConfig {
        &self.config
    }

    pub fn state_cache(&self) -> &StateCache {
        &self.state_cache
    }

    pub fn local_cdn(&self) -> LocalCdn {
        LocalCdn::new(&self.objects_path)
    }

    /// Read-through cache over `cdn`, stored under `objects/`.
    pub fn cdn(&self, cdn: &CdnDescriptor) -> Result<CacheableCdn> {
        let options = RemoteOptions::from(&self.config.remote);
        CacheableCdn::with_options(cdn, &self.objects_path, options)
    }

    pub fn clean_remote(&self, remote: &str) -> String {
        self.config.clean_remote(remote)
    }

    pub fn decryption_key(&self, name: &str) -> Result<DecryptionKey> {
        let not_found = || CdnError::DecryptionKeyNotFound {
            name: name.to_string(),
        };
        let file_name = format!("{name}.ak");
        let mut components = Path::new(&file_name).components();
        if !matches!(components.next(), Some(Component::Normal(_))) || components.next().is_some() {
            return Err(not_found());
        }

        match std::fs::read(self.armadillo_path.join(&file_name)) {
            Ok(bytes) => Ok(DecryptionKey {
                name: name.to_string(),
                bytes,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(err) => Err(err.into()),
        }
    }
}
