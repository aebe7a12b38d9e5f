use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DurationParseError {
    #[error("Empty duration")]
    Empty,
    #[error("Invalid duration [{0}], expected a non-negative number of seconds")]
    Invalid(String),
    #[error("Invalid duration [{input}], expected values like 500ms, 30s, 2m or 1h30m: {source}")]
    Malformed {
        input: String,
        source: humantime::DurationError,
    },
}

/// Parse durations such as `500ms`, `10s`, `2m` or `1h30m`. A bare number, which may be
/// fractional, is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }

    if let Ok(seconds) = input.parse::<f64>() {
        return seconds_to_duration(seconds)
            .ok_or_else(|| DurationParseError::Invalid(input.to_string()));
    }

    humantime::parse_duration(input).map_err(|source| DurationParseError::Malformed {
        input: input.to_string(),
        source,
    })
}

fn seconds_to_duration(seconds: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(seconds).ok()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    FractionalSeconds(f64),
    Text(String),
}

/// A [Duration] as written in configuration files: either a duration string or a number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawDuration")]
pub struct ConfigDuration(pub Duration);

impl TryFrom<RawDuration> for ConfigDuration {
    type Error = DurationParseError;

    fn try_from(value: RawDuration) -> Result<Self, Self::Error> {
        match value {
            RawDuration::Seconds(seconds) => Ok(ConfigDuration(Duration::from_secs(seconds))),
            RawDuration::FractionalSeconds(seconds) => seconds_to_duration(seconds)
                .map(ConfigDuration)
                .ok_or_else(|| DurationParseError::Invalid(seconds.to_string())),
            RawDuration::Text(text) => parse_duration(&text).map(ConfigDuration),
        }
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.0
    }
}
