use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::runner::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_POLL_INTERVAL, RunnerConfig};

pub const DEFAULT_BASE_URL: &str = "https://fobplhljlctv.sealoshzh.site/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub const BASE_URL_VAR: &str = "DETECT_BASE_URL";
pub const TIMEOUT_VAR: &str = "DETECT_TIMEOUT_SECS";
pub const POLL_INTERVAL_VAR: &str = "DETECT_POLL_INTERVAL_MS";
pub const FAILURE_THRESHOLD_VAR: &str = "DETECT_FAILURE_THRESHOLD";

/// Client-side settings for talking to the detection backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectConfig {
    /// Base URL every endpoint path is joined onto
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Delay between status polls while a job is processing
    pub poll_interval: Duration,
    /// Consecutive poll failures tolerated before the job is marked failed
    pub failure_threshold: u32,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

impl DetectConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; unset or unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let base_url = lookup(BASE_URL_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.base_url);

        let timeout = parse_var::<u64, _>(&lookup, TIMEOUT_VAR)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let poll_interval = parse_var::<u64, _>(&lookup, POLL_INTERVAL_VAR)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let failure_threshold = parse_var::<u32, _>(&lookup, FAILURE_THRESHOLD_VAR)
            .filter(|n| *n > 0)
            .unwrap_or(defaults.failure_threshold);

        Self {
            base_url,
            timeout,
            poll_interval,
            failure_threshold,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            poll_interval: self.poll_interval,
            failure_threshold: self.failure_threshold,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}
