use std::io::{self, Read};

use crate::error::CdnError;
use crate::hash::ContentHash;

/// Reader adapter that hashes everything passing through it and checks the digest against the
/// expected [`ContentHash`] once the inner reader reports end-of-stream.
///
/// A mismatch surfaces from the final `read` call as an `InvalidData` error carrying
/// [`CdnError::VerificationFailure`].
pub struct VerifyingReader<R> {
    inner: R,
    context: md5::Context,
    expected: ContentHash,
    finished: bool,
}

impl<R: Read> VerifyingReader<R> {
    pub fn new(inner: R, expected: ContentHash) -> Self {
        Self {
            inner,
            context: md5::Context::new(),
            expected,
            finished: false,
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn verify(&mut self) -> io::Result<()> {
        self.finished = true;
        let context = std::mem::replace(&mut self.context, md5::Context::new());
        let found = format!("{:x}", context.compute());
        if found == self.expected.as_str() {
            return Ok(());
        }

        tracing::debug!(
            target: "keg.cdn",
            expected = %self.expected,
            found = %found,
            "content hash mismatch"
        );
        Err(CdnError::VerificationFailure {
            expected: self.expected.to_string(),
            found,
        }
        .into_io())
    }
}

impl<R: Read> Read for VerifyingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.finished || buf.is_empty() {
            return self.inner.read(buf);
        }

        let read = self.inner.read(buf)?;
        if read == 0 {
            self.verify()?;
            return Ok(0);
        }
        self.context.consume(&buf[..read]);
        Ok(read)
    }
}
