use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{CdnError, Result};
use crate::source::{ByteStream, ItemStream};
use crate::util::{ensure_parent_dir, open_unique_tmp_file, promote_tmp_file, remove_file_best_effort};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Bytes are still flowing from the origin.
    Streaming,
    /// The origin reported end-of-stream without error.
    Drained,
    /// A read or temp-file write failed; the temp file must not be promoted.
    Poisoned,
    /// The temp file was promoted or discarded and the origin released.
    Released,
}

/// Tees an origin stream into a temp file next to `cache_path` and publishes it with an atomic
/// rename once the download is known to be complete.
///
/// Every chunk is written to the temp file before it is returned to the caller. The temp file is
/// promoted only if the origin reached end-of-stream and, when the origin advertised a length,
/// exactly that many bytes were written. [`ItemStream::close`] drains whatever the caller left
/// unread before promoting; dropping the stream without closing it promotes only an already
/// drained download and otherwise discards the temp file.
pub struct CachePopulatingStream {
    inner: Option<ByteStream>,
    temp: Option<File>,
    temp_path: PathBuf,
    cache_path: PathBuf,
    expected_len: Option<u64>,
    written: u64,
    state: State,
}

impl CachePopulatingStream {
    pub fn new(inner: ByteStream, cache_path: impl Into<PathBuf>) -> Result<Self> {
        let cache_path = cache_path.into();
        let parent = ensure_parent_dir(&cache_path)?;
        let (temp_path, temp) = open_unique_tmp_file(&cache_path, &parent)?;
        let expected_len = inner.expected_len();

        Ok(Self {
            inner: Some(inner),
            temp: Some(temp),
            temp_path,
            cache_path,
            expected_len,
            written: 0,
            state: State::Streaming,
        })
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Bytes mirrored into the temp file so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn poison(&mut self) {
        if self.state == State::Streaming {
            self.state = State::Poisoned;
        }
    }

    fn drain(&mut self) -> Result<()> {
        let mut sink = io::sink();
        io::copy(self, &mut sink)?;
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.state == State::Drained
            && self.expected_len.map_or(true, |expected| expected == self.written)
    }

    /// Promote or discard the temp file, then release the origin stream.
    fn release(&mut self) -> Result<()> {
        if self.state == State::Released {
            return Ok(());
        }

        let outcome = if self.is_complete() {
            self.promote()
        } else {
            self.discard();
            Err(CdnError::IncompleteDownload {
                path: self.cache_path.clone(),
                written: self.written,
                expected: self.expected_len,
            })
        };
        self.state = State::Released;

        let closed = match self.inner.take() {
            Some(inner) => inner.close(),
            None => Ok(()),
        };
        outcome.and(closed)
    }

    fn promote(&mut self) -> Result<()> {
        let synced = match self.temp.take() {
            Some(mut temp) => temp.flush().and_then(|()| temp.sync_all()),
            None => Ok(()),
        };
        if let Err(err) = synced {
            remove_file_best_effort(&self.temp_path, "cache_populating_stream.sync_failed");
            return Err(err.into());
        }

        promote_tmp_file(&self.temp_path, &self.cache_path)?;
        tracing::debug!(
            target: "keg.cdn",
            path = %self.cache_path.display(),
            bytes = self.written,
            "promoted cache entry"
        );
        Ok(())
    }

    fn discard(&mut self) {
        drop(self.temp.take());
        remove_file_best_effort(&self.temp_path, "cache_populating_stream.discard");
        tracing::warn!(
            target: "keg.cdn",
            path = %self.cache_path.display(),
            written = self.written,
            expected = ?self.expected_len,
            "discarding incomplete download"
        );
    }
}

impl Read for CachePopulatingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.state {
            State::Streaming => {}
            State::Drained | State::Released => return Ok(0),
            State::Poisoned => {
                return Err(io::Error::other(
                    "cache-populating stream failed earlier; download abandoned",
                ))
            }
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };

        let read = match inner.read(buf) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Err(err),
            Err(err) => {
                self.poison();
                return Err(err);
            }
        };
        if read == 0 {
            if !buf.is_empty() {
                self.state = State::Drained;
            }
            return Ok(0);
        }

        let mirrored = match self.temp.as_mut() {
            Some(temp) => temp.write_all(&buf[..read]),
            None => Err(io::Error::other("cache temp file already closed")),
        };
        if let Err(err) = mirrored {
            self.poison();
            return Err(err);
        }
        self.written += read as u64;
        Ok(read)
    }
}

impl ItemStream for CachePopulatingStream {
    fn expected_len(&self) -> Option<u64> {
        self.expected_len
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        let drained = if self.state == State::Streaming {
            self.drain()
        } else {
            Ok(())
        };
        if let Err(err) = drained {
            // The poisoned state makes `release` discard the temp file.
            self.poison();
            let _ = self.release();
            return Err(err);
        }
        self.release()
    }

    fn abort(mut self: Box<Self>) {
        if self.state != State::Released {
            self.state = State::Poisoned;
            let _ = self.release();
        }
    }
}

impl Drop for CachePopulatingStream {
    fn drop(&mut self) {
        if self.state == State::Released {
            return;
        }
        if let Err(err) = self.release() {
            tracing::debug!(
                target: "keg.cdn",
                path = %self.cache_path.display(),
                error = %err,
                "cache-populating stream released without a complete download"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn stream_for(body: &[u8], dir: &Path) -> CachePopulatingStream {
        let inner: ByteStream = Box::new(Cursor::new(body.to_vec()));
        CachePopulatingStream::new(inner, dir.join("data").join("ab").join("cd").join("abcd"))
            .unwrap()
    }

    /// Origin that yields its body and then fails instead of reporting end-of-stream.
    struct FailingAfter {
        body: Cursor<Vec<u8>>,
    }

    impl Read for FailingAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.body.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
                n => Ok(n),
            }
        }
    }

    impl ItemStream for FailingAfter {}

    #[test]
    fn temp_file_is_written_before_bytes_are_returned() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stream = stream_for(b"hello world", tmp.path());

        let mut buf = [0_u8; 5];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
        assert_eq!(std::fs::read(stream.temp_path()).unwrap(), b"hello");
        assert!(!stream.cache_path().exists());
    }

    #[test]
    fn fully_read_stream_is_promoted_on_close() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stream = Box::new(stream_for(b"hello", tmp.path()));
        let cache_path = stream.cache_path().to_path_buf();
        let temp_path = stream.temp_path().to_path_buf();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert!(!cache_path.exists(), "promotion must wait for release");

        stream.close().unwrap();
        assert_eq!(std::fs::read(&cache_path).unwrap(), b"hello");
        assert!(!temp_path.exists());
    }

    #[test]
    fn close_drains_unread_remainder_before_promoting() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stream = Box::new(stream_for(b"hello world", tmp.path()));
        let cache_path = stream.cache_path().to_path_buf();

        let mut buf = [0_u8; 2];
        stream.read_exact(&mut buf).unwrap();
        stream.close().unwrap();

        assert_eq!(std::fs::read(&cache_path).unwrap(), b"hello world");
    }

    #[test]
    fn dropping_a_partial_read_discards_the_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stream = stream_for(b"hello world", tmp.path());
        let cache_path = stream.cache_path().to_path_buf();
        let temp_path = stream.temp_path().to_path_buf();

        let mut buf = [0_u8; 2];
        stream.read_exact(&mut buf).unwrap();
        drop(stream);

        assert!(!cache_path.exists());
        assert!(!temp_path.exists());
    }

    #[test]
    fn dropping_a_drained_stream_promotes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stream = stream_for(b"hello", tmp.path());
        let cache_path = stream.cache_path().to_path_buf();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        drop(stream);

        assert_eq!(std::fs::read(&cache_path).unwrap(), b"hello");
    }

    #[test]
    fn abort_discards_even_a_drained_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let mut stream = Box::new(stream_for(b"hello", tmp.path()));
        let cache_path = stream.cache_path().to_path_buf();
        let temp_path = stream.temp_path().to_path_buf();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        stream.abort();

        assert!(!cache_path.exists());
        assert!(!temp_path.exists());
    }

    #[test]
    fn origin_failure_poisons_and_discards() {
        let tmp = tempfile::tempdir().unwrap();
        let inner: ByteStream = Box::new(FailingAfter {
            body: Cursor::new(b"partial".to_vec()),
        });
        let cache_path = tmp.path().join("ab").join("cd").join("abcd");
        let mut stream = Box::new(CachePopulatingStream::new(inner, &cache_path).unwrap());
        let temp_path = stream.temp_path().to_path_buf();

        let mut out = Vec::new();
        let err = stream.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(stream.read(&mut [0_u8; 4]).is_err());

        let err = stream.close().unwrap_err();
        assert!(
            matches!(err, CdnError::IncompleteDownload { written: 7, .. }),
            "unexpected error: {err:?}"
        );
        assert!(!cache_path.exists());
        assert!(!temp_path.exists());
    }

    #[test]
    fn length_mismatch_is_not_promoted() {
        /// Claims a longer body than it delivers.
        struct ShortBody(Cursor<Vec<u8>>);

        impl Read for ShortBody {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                self.0.read(buf)
            }
        }

        impl ItemStream for ShortBody {
            fn expected_len(&self) -> Option<u64> {
                Some(10)
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let cache_path = tmp.path().join("abcd");
        let inner: ByteStream = Box::new(ShortBody(Cursor::new(b"short".to_vec())));
        let stream = Box::new(CachePopulatingStream::new(inner, &cache_path).unwrap());

        match stream.close() {
            Err(CdnError::IncompleteDownload {
                written, expected, ..
            }) => {
                assert_eq!(written, 5);
                assert_eq!(expected, Some(10));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!cache_path.exists());
    }

    #[test]
    fn empty_body_promotes_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let stream = Box::new(stream_for(b"", tmp.path()));
        let cache_path = stream.cache_path().to_path_buf();

        stream.close().unwrap();
        assert_eq!(std::fs::read(&cache_path).unwrap(), b"");
    }
}
