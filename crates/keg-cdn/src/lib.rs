//! Content-addressed CDN fetch layer backed by a local object store.
//!
//! Objects are named by the lowercase hex MD5 of their content and stored under a two-level
//! partitioned tree. Reads go through a [`CacheableCdn`]: hits stream from disk, misses stream
//! from a remote origin while being teed into a temp file that is atomically renamed into the
//! object tree once the download completes.
//!
//! ## On-disk layout (inventory)
//!
//! A [`Keg`] rooted at `<root>/` holds:
//! - `keg.conf`:
//!   - TOML settings loaded by `keg-config` ([`keg_config::KegConfig`])
//! - `objects/{config,data,patch}/<h[0:2]>/<h[2:4]>/<h>`:
//!   - cached CDN objects, served by [`LocalCdn`] and populated by [`CachePopulatingStream`]
//!   - archive indexes sit next to their archive with a `.index` suffix
//! - `responses/<name>/<d[0:2]>/<d[2:4]>/<d>`:
//!   - write-once protocol snapshots managed by [`StateCache`]
//! - `fragments/`:
//!   - reserved for extracted fragments
//! - `armadillo/<name>.ak`:
//!   - decryption keys, see [`Keg::decryption_key`]
//!
//! In-flight writes use sibling temp files named `<dest>.keg_temp.<pid>.<counter>`; a canonical
//! name only ever refers to a complete object.

pub mod blizini;
mod cache;
mod error;
mod hash;
mod keg;
mod local;
mod populate;
pub mod psv;
mod remote;
mod source;
mod state_cache;
mod util;
mod verify;

pub use blizini::{BuildConfig, CdnConfig, ConfigMap, ConfigValue, PatchConfig};
pub use cache::CacheableCdn;
pub use error::{CdnError, Result};
pub use hash::{partition_hash, ContentHash, MIN_HASH_LEN};
pub use keg::{DecryptionKey, Keg};
pub use local::LocalCdn;
pub use populate::CachePopulatingStream;
pub use psv::{PsvField, PsvFile, PsvRow};
pub use remote::{CdnDescriptor, RemoteCdn, RemoteOptions};
pub use source::{
    ArchiveIndexParser, BlteDecoder, ByteStream, CdnSource, ContentKind, ItemStream,
};
pub use state_cache::{StateCache, StatefulResponse};
pub use util::{atomic_write, TEMP_MARKER};
pub use verify::VerifyingReader;
