use std::io::{Cursor, Read};

use crate::blizini::{self, BuildConfig, CdnConfig, ConfigMap, PatchConfig};
use crate::error::{CdnError, Result};
use crate::hash::ContentHash;
use crate::verify::VerifyingReader;

/// A sequential byte stream handed out by a [`CdnSource`].
///
/// Streams are released either explicitly with [`ItemStream::close`], which reports errors, or
/// implicitly on drop.
pub trait ItemStream: Read + Send {
    /// Length advertised by the origin, if any.
    fn expected_len(&self) -> Option<u64> {
        None
    }

    /// Release the stream. Cache-populating streams promote their cache entry here.
    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    /// Release the stream after the caller rejected its content. Nothing read so far is kept.
    fn abort(self: Box<Self>) {}
}

pub type ByteStream = Box<dyn ItemStream>;

impl ItemStream for std::fs::File {
    fn expected_len(&self) -> Option<u64> {
        self.metadata().ok().map(|meta| meta.len())
    }
}

impl<T: AsRef<[u8]> + Send> ItemStream for Cursor<T> {
    fn expected_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// Top-level CDN directory an object lives under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Config,
    Data,
    Patch,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Data => "data",
            Self::Patch => "patch",
        }
    }

    /// `/{kind}/{h[0:2]}/{h[2:4]}/{h}{suffix}`
    pub fn item_path(self, hash: &ContentHash, suffix: &str) -> String {
        format!("/{}/{}", self.as_str(), hash.partition_with_suffix(suffix))
    }
}

/// Parser for binary archive indexes (`/data/{hash}.index`).
pub trait ArchiveIndexParser {
    type Index;

    fn parse(&self, bytes: &[u8], hash: &ContentHash, verify: bool) -> Result<Self::Index>;
}

impl<F, I> ArchiveIndexParser for F
where
    F: Fn(&[u8], &ContentHash, bool) -> Result<I>,
{
    type Index = I;

    fn parse(&self, bytes: &[u8], hash: &ContentHash, verify: bool) -> Result<I> {
        self(bytes, hash, verify)
    }
}

/// Decoder for BLTE-encoded data blobs.
pub trait BlteDecoder {
    fn decode(&self, reader: &mut dyn Read, hash: &ContentHash, verify: bool)
        -> Result<Vec<Vec<u8>>>;
}

impl<F> BlteDecoder for F
where
    F: Fn(&mut dyn Read, &ContentHash, bool) -> Result<Vec<Vec<u8>>>,
{
    fn decode(
        &self,
        reader: &mut dyn Read,
        hash: &ContentHash,
        verify: bool,
    ) -> Result<Vec<Vec<u8>>> {
        self(reader, hash, verify)
    }
}

/// Anything that can serve CDN paths: the local object store, a remote origin, or the
/// read-through cache composing both.
///
/// Implementors provide [`CdnSource::get_item`]; every higher level download is built on it.
pub trait CdnSource {
    /// Open `path` (e.g. `/config/ab/cd/abcd...`) for sequential reading.
    fn get_item(&self, path: &str) -> Result<ByteStream>;

    /// Read `path` to the end and release the stream.
    fn read_item(&self, path: &str) -> Result<Vec<u8>> {
        let mut stream = self.get_item(path)?;
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        stream.close()?;
        Ok(bytes)
    }

    /// Fetch the undecoded bytes of an object, optionally checking them against `hash`.
    fn download_raw(&self, kind: ContentKind, hash: &str, verify: bool) -> Result<Vec<u8>> {
        let hash = ContentHash::new(hash)?;
        let path = kind.item_path(&hash, "");
        if !verify {
            return self.read_item(&path);
        }

        let mut stream = self.get_item(&path)?;
        let mut bytes = Vec::new();
        if let Err(err) = VerifyingReader::new(&mut stream, hash).read_to_end(&mut bytes) {
            stream.abort();
            return Err(err.into());
        }
        stream.close()?;
        Ok(bytes)
    }

    fn download_config(&self, hash: &str) -> Result<ConfigMap> {
        let bytes = self.download_raw(ContentKind::Config, hash, false)?;
        decode_config_bytes(&bytes)
    }

    /// Like [`CdnSource::download_config`], rejecting content whose MD5 differs from `hash`.
    fn download_config_verified(&self, hash: &str) -> Result<ConfigMap> {
        let bytes = self.download_raw(ContentKind::Config, hash, true)?;
        decode_config_bytes(&bytes)
    }

    fn download_build_config(&self, hash: &str) -> Result<BuildConfig> {
        self.download_config(hash).map(BuildConfig::from)
    }

    fn download_cdn_config(&self, hash: &str) -> Result<CdnConfig> {
        self.download_config(hash).map(CdnConfig::from)
    }

    fn download_patch_config(&self, hash: &str) -> Result<PatchConfig> {
        self.download_config(hash).map(PatchConfig::from)
    }

    fn download_data_index<P>(&self, hash: &str, parser: &P, verify: bool) -> Result<P::Index>
    where
        P: ArchiveIndexParser + ?Sized,
    {
        let hash = ContentHash::new(hash)?;
        let mut stream = self.get_item(&ContentKind::Data.item_path(&hash, ".index"))?;
        let mut bytes = Vec::new();
        let parsed = stream
            .read_to_end(&mut bytes)
            .map_err(CdnError::from)
            .and_then(|_| parser.parse(&bytes, &hash, verify));
        match parsed {
            Ok(index) => {
                stream.close()?;
                Ok(index)
            }
            Err(err) => {
                stream.abort();
                Err(err)
            }
        }
    }

    /// Fetch a data blob and join the blocks produced by `decoder`.
    fn download_data<D>(&self, hash: &str, decoder: &D, verify: bool) -> Result<Vec<u8>>
    where
        D: BlteDecoder + ?Sized,
    {
        let hash = ContentHash::new(hash)?;
        let mut stream = self.get_item(&ContentKind::Data.item_path(&hash, ""))?;
        let blocks = match decoder.decode(&mut stream, &hash, verify) {
            Ok(blocks) => blocks,
            Err(err) => {
                stream.abort();
                return Err(err);
            }
        };
        stream.close()?;
        Ok(blocks.concat())
    }
}

fn decode_config_bytes(bytes: &[u8]) -> Result<ConfigMap> {
    let text = std::str::from_utf8(bytes)
        .map_err(|err| CdnError::decode(format!("config is not valid utf-8: {err}")))?;
    blizini::decode_config(text)
}
