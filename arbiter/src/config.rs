use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{env, path::Path, str::FromStr, time::Duration};
use tracing::debug;

pub const ENV_RESPONDER_DURATION_SECS: &str = "RTTD_RESPONDER_DURATION_SECS";
pub const ENV_MAX_TARGETS: &str = "RTTD_MAX_TARGETS";
pub const ENV_MAX_QUEUED: &str = "RTTD_MAX_QUEUED";
pub const ENV_RANGING_TIMEOUT_MS: &str = "RTTD_RANGING_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// How long the driver keeps responder mode up; 0 means until disabled
    pub responder_duration_secs: u32,
    pub max_targets_per_request: usize,
    /// Queued plus in-flight requests a single client may have
    pub max_queued_per_client: usize,
    /// Watchdog for accepted bursts; 0 turns it off
    pub ranging_timeout_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            responder_duration_secs: 0,
            max_targets_per_request: 10,
            max_queued_per_client: 20,
            ranging_timeout_ms: 5_000,
        }
    }
}

impl ArbiterConfig {
    /// Defaults, overlaid by `path` if given, overlaid by `RTTD_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_overrides(|name| env::var(name).ok())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading arbiter config");
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_override(&lookup, ENV_RESPONDER_DURATION_SECS)? {
            self.responder_duration_secs = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_MAX_TARGETS)? {
            self.max_targets_per_request = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_MAX_QUEUED)? {
            self.max_queued_per_client = v;
        }
        if let Some(v) = parse_override(&lookup, ENV_RANGING_TIMEOUT_MS)? {
            self.ranging_timeout_ms = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_targets_per_request == 0 {
            return Err(Error::Config("max_targets_per_request must be at least 1".into()));
        }
        if self.max_queued_per_client == 0 {
            return Err(Error::Config("max_queued_per_client must be at least 1".into()));
        }
        Ok(())
    }

    pub fn responder_duration(&self) -> Duration {
        Duration::from_secs(u64::from(self.responder_duration_secs))
    }

    pub fn ranging_timeout(&self) -> Option<Duration> {
        (self.ranging_timeout_ms > 0).then(|| Duration::from_millis(self.ranging_timeout_ms))
    }
}

fn parse_override<F, T>(lookup: &F, name: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("{name}: cannot parse {raw:?}")))
}
