use std::time::Duration;

use gale_instruments::ThresholdParseError;

/// A problem with the run configuration. These are all detected before any virtual user starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No scenarios defined")]
    NoScenarios,
    #[error("Scenario [{0}] is defined more than once")]
    DuplicateScenario(String),
    #[error("Scenario [{scenario}] must run with at least one virtual user")]
    ZeroConcurrency { scenario: String },
    #[error("Scenario [{scenario}] uses a ramping executor but has no stages")]
    NoStages { scenario: String },
    #[error("Scenario [{scenario}] has min_sleep {min:?} greater than max_sleep {max:?}")]
    InvalidPacing {
        scenario: String,
        min: Duration,
        max: Duration,
    },
    #[error("Scenario [{scenario}] has a zero control interval")]
    ZeroControlInterval { scenario: String },
    #[error("Scenario [{scenario}] has no expected response statuses")]
    NoExpectedStatuses { scenario: String },
    #[error("Scenario [{scenario}] is missing required field `{field}` for its executor")]
    MissingField {
        scenario: String,
        field: &'static str,
    },
    #[error("Unknown executor [{0}], expected fixed-iterations, constant-concurrency or ramping-concurrency")]
    UnknownExecutor(String),
    #[error("Unknown ramp shape [{0}], expected linear or step")]
    UnknownRampShape(String),
    #[error("The workload catalog has no groups")]
    EmptyCatalog,
    #[error("Workload group [{0}] has no requests")]
    EmptyGroup(String),
    #[error("Workload group [{0}] is defined more than once")]
    DuplicateGroup(String),
    #[error("Scenario [{scenario}] refers to unknown workload group [{group}]")]
    UnknownGroup { scenario: String, group: String },
    #[error("No target host configured, set `target` or TARGET_HOST")]
    MissingTarget,
    #[error("Invalid target [{target}]: {source}")]
    InvalidTarget {
        target: String,
        source: url::ParseError,
    },
    #[error("Target [{0}] cannot be used as a base for request paths")]
    UnsupportedTarget(String),
    #[error("Invalid request [{path}] in group [{group}]: {reason}")]
    InvalidRequest {
        group: String,
        path: String,
        reason: String,
    },
    #[error("Invalid threshold [{rule}]: {source}")]
    InvalidThreshold {
        rule: String,
        source: ThresholdParseError,
    },
    #[error("Invalid value [{value}] for environment variable {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("Invalid expected status range [{0}]")]
    InvalidStatus(String),
}
