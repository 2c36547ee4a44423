//! Flat processor configuration.
//!
//! Processors are configured by a flat set of string properties, with
//! repeating groups expressed as index-suffixed families (`COLUMN_0`,
//! `COLUMN_TYPE_0`, `COLUMN_1`, ...). A [`PropertySet`] can be read from a JSON
//! object file and overlaid with `ZCOLMAP_`-prefixed environment variables.

use crate::error::{ColmapError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::debug;

pub const TABLE_NAME: &str = "TABLE_NAME";
pub const TRANSACTIONAL_LOGGING: &str = "TRANSACTIONAL_LOGGING";
pub const FAIL_ON_ERROR: &str = "FAIL_ON_ERROR";
pub const SEPARATOR: &str = "SEPARATOR";
pub const LOG_SYSDATE_IN_UTC: &str = "LOG_SYSDATE_IN_UTC";
pub const QUERY_TIMEOUT_SECS: &str = "QUERY_TIMEOUT_SECS";
pub const DIALECT: &str = "DIALECT";
pub const PROCESSOR: &str = "PROCESSOR";

pub const COLUMN: &str = "COLUMN";
pub const COLUMN_TYPE: &str = "COLUMN_TYPE";
pub const DATE_FORMAT: &str = "DATE_FORMAT";
pub const LOCATION: &str = "LOCATION";
pub const DEFAULT: &str = "DEFAULT";
pub const OPTIONAL: &str = "OPTIONAL";
pub const INPUT_TIMEZONE: &str = "INPUT_TIMEZONE";
pub const OUTPUT_TIMEZONE: &str = "OUTPUT_TIMEZONE";

pub const WHERE_STATEMENT: &str = "SQL_WHERE_STATEMENT";
pub const WHERE_COLUMN_TYPE: &str = "WHERE_COLUMN_TYPE";
pub const WHERE_DATE_FORMAT: &str = "WHERE_DATE_FORMAT";
pub const WHERE_LOCATION: &str = "WHERE_LOCATION";
pub const WHERE_DEFAULT: &str = "WHERE_DEFAULT";

pub const SEARCH_TABLE_NAME: &str = "SEARCH_TABLE_NAME";
pub const UPDATE_TABLE_NAME: &str = "UPDATE_TABLE_NAME";
pub const CORRELATION_LOCATION: &str = "CORRELATION_LOCATION";
pub const CORRELATION_COLUMN: &str = "CORRELATION_COLUMN";
pub const REFERENCE_KEY_COLUMN: &str = "REFERENCE_KEY_COLUMN";
pub const BATCH_KEY_ARITY: &str = "BATCH_KEY_ARITY";
pub const STAGING_COLUMN: &str = "STAGING_COLUMN";
pub const STAGING_COLUMN_TYPE: &str = "STAGING_COLUMN_TYPE";
pub const STAGING_DATE_FORMAT: &str = "STAGING_DATE_FORMAT";
pub const DELETE_MARKER: &str = "DELETE_MARKER";

/// Prefix of environment variables that override file properties
pub const ENV_PREFIX: &str = "ZCOLMAP_";

/// Build the key of one member of an index-suffixed family
pub fn indexed(prefix: &str, ix: usize) -> String {
    format!("{}_{}", prefix, ix)
}

/// Ordered string properties for one processor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertySet {
    values: IndexMap<String, String>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON object of scalars. Numbers and booleans are stored as their text.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let JsonValue::Object(map) = value else {
            return Err(ColmapError::configuration(
                "processor properties must be a JSON object",
            ));
        };

        let mut props = Self::new();
        for (key, node) in map {
            let text = match node {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                JsonValue::Null => continue,
                _ => {
                    return Err(ColmapError::configuration(format!(
                        "property {} must be a scalar",
                        key
                    )))
                }
            };
            props.set(key.clone(), text);
        }
        Ok(props)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading processor properties from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        let value: JsonValue = serde_json::from_str(&raw)?;
        Self::from_json(&value)
    }

    /// Overlay `ZCOLMAP_<KEY>` variables from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(std::env::vars())
    }

    /// Overlay prefixed pairs; used by [`Self::with_env_overrides`]
    pub fn with_overrides_from<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                debug!("Property {} overridden from environment", stripped);
                self.set(stripped.to_string(), value);
            }
        }
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Value of a property; blank values count as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn required(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| {
            ColmapError::configuration(format!("missing required property {}", key))
        })
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => parse_bool(raw).ok_or_else(|| {
                ColmapError::configuration(format!(
                    "property {} has non-boolean value [{}]",
                    key, raw
                ))
            }),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<u64>().map_err(|_| {
                    ColmapError::configuration(format!(
                        "property {} has non-numeric value [{}]",
                        key, raw
                    ))
                })
            })
            .transpose()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for PropertySet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.set(k, v);
        }
        props
    }
}

/// Lenient boolean spelling used by processor properties
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
