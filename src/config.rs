use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

use crate::threshold::RouteOverride;

/// Tag carried by every emission, and the key routes use for their own settings.
pub const BASE_TAG: &str = "rslow";
pub const PLUGIN_KEY: &str = "rslow";
pub const DEFAULT_THRESHOLD_MS: i64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read options file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid options: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Global options for the timing layer.
///
/// Values are not validated; a negative threshold makes every request slow.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlowOptions {
    /// Milliseconds a request may take before it is reported.
    pub threshold: i64,
    /// Extra tags merged into every emission.
    pub tags: BTreeSet<String>,
    /// Report every request, slow or not.
    pub verbose: bool,
    /// Put the request id in the payload.
    pub include_id: bool,
    /// Time each pipeline phase automatically.
    pub request_lifecycle: bool,
}

impl Default for SlowOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD_MS,
            tags: BTreeSet::from([BASE_TAG.to_string()]),
            verbose: false,
            include_id: false,
            request_lifecycle: false,
        }
    }
}

impl SlowOptions {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn with_threshold(mut self, threshold: i64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn include_id(mut self, include_id: bool) -> Self {
        self.include_id = include_id;
        self
    }

    pub fn request_lifecycle(mut self, enabled: bool) -> Self {
        self.request_lifecycle = enabled;
        self
    }
}

/// Per-route configuration, keyed by plugin name so unrelated extensions can share it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RouteSettings {
    #[serde(default)]
    pub plugins: Map<String, Value>,
}

impl RouteSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plugin(mut self, key: impl Into<String>, value: Value) -> Self {
        self.plugins.insert(key.into(), value);
        self
    }

    pub fn with_slow(self, route: RouteOverride) -> Self {
        match serde_json::to_value(route) {
            Ok(value) => self.with_plugin(PLUGIN_KEY, value),
            Err(e) => {
                warn!("could not store route threshold: {}", e);
                self
            }
        }
    }

    pub fn plugin(&self, key: &str) -> Option<&Value> {
        self.plugins.get(key)
    }

    /// The override stored under [`PLUGIN_KEY`]. Values that do not parse are ignored.
    pub fn slow_override(&self) -> Option<RouteOverride> {
        let value = self.plugin(PLUGIN_KEY)?;
        match RouteOverride::deserialize(value) {
            Ok(route) => Some(route),
            Err(e) => {
                warn!("ignoring route settings under '{}': {}", PLUGIN_KEY, e);
                None
            }
        }
    }
}
