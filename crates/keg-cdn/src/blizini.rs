//! `key = value` config files served under `/config/` (build, CDN and patch configs).

use crate::error::{CdnError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigValue {
    Single(String),
    List(Vec<String>),
}

impl ConfigValue {
    fn parse(raw: &str) -> Self {
        let mut tokens: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if tokens.len() > 1 {
            return Self::List(tokens);
        }
        Self::Single(tokens.pop().unwrap_or_default())
    }

    /// The value as a list; a single value is a one-element list.
    pub fn as_list(&self) -> Vec<&str> {
        match self {
            Self::Single(value) if value.is_empty() => Vec::new(),
            Self::Single(value) => vec![value.as_str()],
            Self::List(values) => values.iter().map(String::as_str).collect(),
        }
    }

    /// First token of the value.
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::Single(value) if value.is_empty() => None,
            Self::Single(value) => Some(value.as_str()),
            Self::List(values) => values.first().map(String::as_str),
        }
    }
}

/// Decoded config entries in file order.
///
/// Keys may repeat (patch configs list one `patch-entry` per line), so entries are kept as a list
/// rather than a map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigMap {
    entries: Vec<(String, ConfigValue)>,
}

impl ConfigMap {
    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a ConfigValue> + 'a {
        self.entries
            .iter()
            .filter(move |(name, _)| name == key)
            .map(|(_, value)| value)
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::first)
    }

    pub fn list(&self, key: &str) -> Vec<&str> {
        self.get(key).map(ConfigValue::as_list).unwrap_or_default()
    }

    pub fn entries(&self) -> &[(String, ConfigValue)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn decode_config(text: &str) -> Result<ConfigMap> {
    let mut entries = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(CdnError::decode(format!(
                "line {}: expected `key = value`",
                idx + 1
            )));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(CdnError::decode(format!("line {}: empty key", idx + 1)));
        }
        entries.push((key.to_string(), ConfigValue::parse(value)));
    }
    Ok(ConfigMap { entries })
}

macro_rules! config_wrapper {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Default, PartialEq, Eq)]
        pub struct $name(ConfigMap);

        impl $name {
            pub fn as_map(&self) -> &ConfigMap {
                &self.0
            }
        }

        impl From<ConfigMap> for $name {
            fn from(map: ConfigMap) -> Self {
                Self(map)
            }
        }

        impl std::ops::Deref for $name {
            type Target = ConfigMap;

            fn deref(&self) -> &ConfigMap {
                &self.0
            }
        }
    };
}

config_wrapper!(
    /// Build config: root, install, download and encoding keys of one build.
    BuildConfig
);
config_wrapper!(
    /// CDN config: the archive list of a product.
    CdnConfig
);
config_wrapper!(PatchConfig);

impl BuildConfig {
    pub fn root(&self) -> Option<&str> {
        self.first("root")
    }

    /// Content key followed by encoding key, when both are present.
    pub fn encoding(&self) -> Vec<&str> {
        self.list("encoding")
    }

    pub fn build_name(&self) -> Option<&str> {
        self.first("build-name")
    }
}

impl CdnConfig {
    pub fn archives(&self) -> Vec<&str> {
        self.list("archives")
    }

    pub fn archive_group(&self) -> Option<&str> {
        self.first("archive-group")
    }

    pub fn patch_archives(&self) -> Vec<&str> {
        self.list("patch-archives")
    }
}

impl PatchConfig {
    pub fn patch(&self) -> Option<&str> {
        self.first("patch")
    }

    pub fn patch_entries(&self) -> Vec<Vec<&str>> {
        self.get_all("patch-entry").map(ConfigValue::as_list).collect()
    }
}
