use std::io::{self, Read};
use std::time::Duration;

use crate::error::{CdnError, Result};
use crate::psv::{PsvFile, PsvRow};
use crate::source::{ByteStream, CdnSource, ItemStream};

const URL_REDACTION: &str = "<redacted>";

/// A CDN entry as advertised by the patch service: mirror base URLs plus the path prefix under
/// which the product's `config/` and `data/` trees live.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CdnDescriptor {
    pub name: String,
    pub path: String,
    /// Bare host names, reached over plain `http://`.
    pub hosts: Vec<String>,
    /// Full base URLs.
    pub servers: Vec<String>,
}

impl CdnDescriptor {
    pub fn new(servers: impl IntoIterator<Item = impl Into<String>>, path: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            path: path.into(),
            hosts: Vec::new(),
            servers: servers.into_iter().map(Into::into).collect(),
        }
    }

    /// Servers first, then hosts turned into `http://{host}` URLs, in advertised order.
    pub fn all_servers(&self) -> Vec<String> {
        self.servers
            .iter()
            .cloned()
            .chain(self.hosts.iter().map(|host| format!("http://{host}")))
            .collect()
    }

    /// Build a descriptor from a row of a `cdns` response (`Name|Path|Hosts|Servers|...`).
    pub fn from_psv_row(row: &PsvRow) -> Self {
        let split = |column: &str| -> Vec<String> {
            row.get(column)
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect()
        };
        Self {
            name: row.get("Name").unwrap_or_default().to_string(),
            path: row.get("Path").unwrap_or_default().to_string(),
            hosts: split("Hosts"),
            servers: split("Servers"),
        }
    }

    /// Every descriptor listed in a `cdns` response.
    pub fn all_from_psv(file: &PsvFile) -> Vec<Self> {
        file.rows().iter().map(Self::from_psv_row).collect()
    }
}

/// Transport settings for [`RemoteCdn`].
#[derive(Clone, Copy, Debug)]
pub struct RemoteOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&keg_config::RemoteConfig> for RemoteOptions {
    fn from(config: &keg_config::RemoteConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

/// Streams CDN paths over HTTP from the first server of a [`CdnDescriptor`].
///
/// There is no failover across mirrors here; callers wanting it build one `RemoteCdn` per
/// server.
#[derive(Clone, Debug)]
pub struct RemoteCdn {
    agent: ureq::Agent,
    server: String,
    path: String,
}

impl RemoteCdn {
    pub fn new(cdn: &CdnDescriptor) -> Result<Self> {
        Self::with_options(cdn, RemoteOptions::default())
    }

    pub fn with_options(cdn: &CdnDescriptor, options: RemoteOptions) -> Result<Self> {
        let server = cdn
            .all_servers()
            .into_iter()
            .next()
            .ok_or(CdnError::EmptyServerList)?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(options.connect_timeout)
            .timeout_read(options.read_timeout)
            .build();

        Ok(Self {
            agent,
            server,
            path: cdn.path.clone(),
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// `{server}/{prefix}{path}`
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}{}", self.server.trim_end_matches('/'), self.path, path)
    }
}

impl CdnSource for RemoteCdn {
    fn get_item(&self, path: &str) -> Result<ByteStream> {
        let url = self.url_for(path);
        let safe_url = sanitize_url(&url);
        tracing::debug!(target: "keg.cdn", url = %safe_url, "fetching remote item");

        let response = self.agent.get(&url).call().map_err(|err| {
            let message = match err {
                ureq::Error::Status(code, _response) => {
                    format!("server returned status {code} for {safe_url}")
                }
                // `Transport`'s Display echoes the raw URL.
                ureq::Error::Transport(transport) => match transport.message() {
                    Some(detail) => {
                        format!("transport error for {safe_url}: {}: {detail}", transport.kind())
                    }
                    None => format!("transport error for {safe_url}: {}", transport.kind()),
                },
            };
            CdnError::RemoteUnavailable { message }
        })?;

        let len = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        Ok(Box::new(RemoteItem {
            reader: response.into_reader(),
            len,
        }))
    }
}

struct RemoteItem {
    reader: Box<dyn Read + Send + Sync + 'static>,
    len: Option<u64>,
}

impl Read for RemoteItem {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl ItemStream for RemoteItem {
    fn expected_len(&self) -> Option<u64> {
        self.len
    }
}

/// Redact userinfo and query/fragment values so URLs can be logged and put in errors. Mirror
/// URLs may be pre-signed.
pub(crate) fn sanitize_url(url: &str) -> String {
    let Some(scheme_idx) = url.find("://") else {
        return url.to_owned();
    };

    let (scheme, rest) = url.split_at(scheme_idx + 3);
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);

    let authority = match authority.rfind('@') {
        Some(at_pos) => format!("{URL_REDACTION}@{}", &authority[at_pos + 1..]),
        None => authority.to_owned(),
    };

    let (before_fragment, has_fragment) = match tail.find('#') {
        Some(pos) => (&tail[..pos], true),
        None => (tail, false),
    };
    let mut tail = match before_fragment.split_once('?') {
        Some((path, query)) => format!("{path}?{}", sanitize_query(query)),
        None => before_fragment.to_owned(),
    };
    if has_fragment {
        tail.push('#');
        tail.push_str(URL_REDACTION);
    }

    format!("{scheme}{authority}{tail}")
}

fn sanitize_query(query: &str) -> String {
    query
        .split('&')
        .map(|part| {
            if part.is_empty() {
                return String::new();
            }
            let key = part.split_once('=').map_or(part, |(key, _)| key);
            format!("{key}={URL_REDACTION}")
        })
        .collect::<Vec<_>>()
        .join("&")
}
