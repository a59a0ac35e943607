//! `keg.conf` handling and process-wide logging setup.

use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, OnceLock};

use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// Name of the config file inside a keg directory.
pub const CONFIG_FILENAME: &str = "keg.conf";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KegConfig {
    /// Prepended to remotes given without a scheme (`us` -> `http://us.patch.battle.net:1119/us`).
    #[serde(default = "KegConfig::default_remote_prefix")]
    pub default_remote_prefix: String,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KegConfig {
    fn default_remote_prefix() -> String {
        "http://us.patch.battle.net:1119/".to_owned()
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    /// Load `path`, falling back to defaults when the file does not exist yet.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match Self::load_from_path(path) {
            Err(ConfigError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Write this config to `path` through a temp file in the same directory.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text =
            toml::to_string_pretty(self).map_err(|err| ConfigError::Toml(err.to_string()))?;
        let io_err = |source: io::Error| ConfigError::Io {
            path: path.display().to_string(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
        tmp.write_all(text.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    /// Write the default config to `path` unless a config already exists there.
    ///
    /// Returns `true` when a file was written.
    pub fn initialize(path: impl AsRef<Path>) -> Result<bool, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            return Ok(false);
        }
        Self::default().save(path)?;
        tracing::debug!(target: "keg.config", path = %path.display(), "wrote default config");
        Ok(true)
    }

    /// Expand a short remote name into a URL using [`KegConfig::default_remote_prefix`].
    ///
    /// Values that already carry a scheme are returned unchanged.
    pub fn clean_remote(&self, remote: &str) -> String {
        if remote.contains("://") {
            return remote.to_owned();
        }
        format!("{}{remote}", self.default_remote_prefix)
    }
}

impl Default for KegConfig {
    fn default() -> Self {
        Self {
            default_remote_prefix: Self::default_remote_prefix(),
            remote: RemoteConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "RemoteConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Per-read timeout while streaming a response body.
    #[serde(default = "RemoteConfig::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl RemoteConfig {
    fn default_connect_timeout_ms() -> u64 {
        10_000
    }

    fn default_read_timeout_ms() -> u64 {
        60_000
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            read_timeout_ms: Self::default_read_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path. If the file cannot be opened, file logging is disabled
    /// while other sinks remain active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Effective filter: the configured level, with `RUST_LOG` merged on top when set.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` includes a source snippet; keep only the message, without quoted values.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

fn sanitize_toml_error_message(message: &str) -> String {
    // A double quote left open at the end of the message is redacted through to the end.
    static DOUBLE_QUOTED_RE: OnceLock<regex::Regex> = OnceLock::new();
    static SINGLE_QUOTED_RE: OnceLock<regex::Regex> = OnceLock::new();

    let double = DOUBLE_QUOTED_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*(?:"|$)"#)
            .expect("quoted-string regex should compile")
    });
    let single = SINGLE_QUOTED_RE.get_or_init(|| {
        regex::Regex::new(r#"'(?:\\.|[^'\\])*'"#)
            .expect("single-quoted-string regex should compile")
    });

    let out = redact_quoted(double, message, '"');
    let mut out = redact_quoted(single, &out, '\'');

    // serde wraps user-controlled keys and scalars in backticks: `unknown field `x``,
    // `invalid type: integer `1`, expected ...`. Schema names after `, expected` are kept.
    let boundary = out.find(", expected").unwrap_or(out.len());
    let start = ["unknown field `", "unknown variant `"]
        .iter()
        .filter_map(|pattern| out[..boundary].find(pattern).map(|pos| pos + pattern.len() - 1))
        .min()
        .or_else(|| {
            (out.contains("invalid type:") || out.contains("invalid value:"))
                .then(|| out[..boundary].find('`'))
                .flatten()
        });
    if let Some(start) = start {
        if let Some(end_rel) = out[start + 1..boundary].rfind('`') {
            out.replace_range(start + 1..start + 1 + end_rel, "<redacted>");
        }
    }

    out
}

fn redact_quoted(re: &regex::Regex, text: &str, quote: char) -> String {
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let matched = &caps[0];
        let closed = matched.len() >= 2 && matched.ends_with(quote);
        if closed {
            format!("{quote}<redacted>{quote}")
        } else {
            format!("{quote}<redacted>")
        }
    })
    .into_owned()
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            guard: self
                .file
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber described by `config`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            // `TestWriter` keeps `cargo test` output capture working in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter {
                file: Arc::new(Mutex::new(file)),
            }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = config.file.as_ref() {
                tracing::warn!(
                    target: "keg.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
