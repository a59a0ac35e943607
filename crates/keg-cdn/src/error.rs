use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CdnError>;

/// Errors produced by CDN lookups, the object cache and the state cache.
#[derive(Debug, thiserror::Error)]
pub enum CdnError {
    #[error("invalid content hash {hash:?}: {reason}")]
    InvalidHash { hash: String, reason: &'static str },

    #[error("invalid cache path {path:?}")]
    InvalidPath { path: String },

    #[error("{path} not found")]
    NotFound { path: PathBuf },

    #[error("remote unavailable: {message}")]
    RemoteUnavailable { message: String },

    #[error("cdn descriptor has no servers")]
    EmptyServerList,

    #[error("content verification failed: expected {expected}, found {found}")]
    VerificationFailure { expected: String, found: String },

    #[error(
        "incomplete download for {path}: wrote {written} bytes, expected {}",
        .expected.map_or_else(|| "end of stream".to_string(), |len| format!("{len} bytes"))
    )]
    IncompleteDownload {
        path: PathBuf,
        written: u64,
        expected: Option<u64>,
    },

    #[error("decode error: {message}")]
    Decode { message: String },

    #[error("decryption key {name:?} not found")]
    DecryptionKeyNotFound { name: String },

    #[error("config error: {0}")]
    Config(#[from] keg_config::ConfigError),

    #[error("io error: {0}")]
    Io(#[source] io::Error),
}

impl CdnError {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Wrap this error so it can travel through `std::io::Read` and be recovered by
    /// `From<io::Error>` on the other side.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match &self {
            Self::VerificationFailure { .. } | Self::Decode { .. } => io::ErrorKind::InvalidData,
            Self::NotFound { .. } => io::ErrorKind::NotFound,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

impl From<io::Error> for CdnError {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<CdnError>()) {
            return Self::Io(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CdnError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => Self::Io(io::Error::new(kind, other)),
            None => Self::Io(kind.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_wrapped_cdn_errors_are_recovered() {
        let err = CdnError::VerificationFailure {
            expected: "aaaa".to_string(),
            found: "bbbb".to_string(),
        };
        let io_err = err.into_io();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);

        match CdnError::from(io_err) {
            CdnError::VerificationFailure { expected, found } => {
                assert_eq!(expected, "aaaa");
                assert_eq!(found, "bbbb");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn plain_io_errors_stay_io() {
        let err = CdnError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        match err {
            CdnError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn incomplete_download_message_mentions_expected_length() {
        let err = CdnError::IncompleteDownload {
            path: PathBuf::from("data/ab/cd/abcd"),
            written: 3,
            expected: Some(5),
        };
        assert_eq!(
            err.to_string(),
            "incomplete download for data/ab/cd/abcd: wrote 3 bytes, expected 5 bytes"
        );
    }
}
