use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::tags::TagSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Success
    }
}

/// One measured request.
///
/// `timestamp` is taken from the run clock when the request was issued, so it is monotonic per
/// virtual user but interleaves arbitrarily across virtual users.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub tags: TagSet,
    pub timestamp: Duration,
    pub latency: Duration,
    pub outcome: Outcome,
    /// The response status, if a response was received at all.
    pub status: Option<u16>,
}

impl MetricSample {
    pub fn new(tags: TagSet, timestamp: Duration, latency: Duration, outcome: Outcome) -> Self {
        Self {
            tags,
            timestamp,
            latency,
            outcome,
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}
