use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::SettingsError;

/// Safety limits applied to every data source evaluation in a session.
///
/// Durations are written as human readable strings when (de)serialized, for
/// example `{"timeout": "45s", "progress_threshold": "250ms"}`. Missing fields
/// fall back to their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long a single evaluation may run before it is abandoned.
    #[serde(with = "human")]
    pub timeout: Duration,
    /// Maximum number of choices kept from a single evaluation.
    pub max_results: usize,
    /// How long an evaluation may run before the working indicator is shown.
    #[serde(with = "human")]
    pub progress_threshold: Duration,
}

impl Settings {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_RESULTS: usize = 1000;
    pub const DEFAULT_PROGRESS_THRESHOLD: Duration = Duration::from_millis(500);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn progress_threshold(mut self, threshold: Duration) -> Self {
        self.progress_threshold = threshold;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
            max_results: Self::DEFAULT_MAX_RESULTS,
            progress_threshold: Self::DEFAULT_PROGRESS_THRESHOLD,
        }
    }
}

mod human {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
