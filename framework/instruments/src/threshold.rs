use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregator::{MetricsAggregator, Selection};
use crate::tags::{TagFilter, TagParseError, EXPECTED_RESPONSE_TAG};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThresholdParseError {
    #[error("Threshold condition [{0}] has no comparator, expected one of <, <=, >, >=, ==, !=")]
    MissingComparator(String),
    #[error("Unknown threshold statistic [{0}], expected p(N), avg, med, min, max, count or rate")]
    UnknownStatistic(String),
    #[error("Invalid percentile [{0}], must be a number between 0 and 100")]
    InvalidPercentile(String),
    #[error("Invalid threshold bound [{0}]")]
    InvalidBound(String),
    #[error("Threshold rule must reference at least one recorded tag besides expected_response")]
    EmptyFilter,
    #[error(transparent)]
    Tag(#[from] TagParseError),
}

/// The value computed over the selected samples. Latency statistics are in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    Percentile(f64),
    Avg,
    Med,
    Min,
    Max,
    /// Number of selected samples.
    Count,
    /// Fraction of selected samples that failed, between 0 and 1.
    Rate,
}

impl Statistic {
    fn compute(&self, selection: &Selection) -> Option<f64> {
        match self {
            Statistic::Percentile(p) => selection.percentile(*p),
            Statistic::Avg => selection.mean(),
            Statistic::Med => selection.percentile(50.0),
            Statistic::Min => selection.min(),
            Statistic::Max => selection.max(),
            Statistic::Count => Some(selection.count() as f64),
            Statistic::Rate => selection.failure_rate(),
        }
    }
}

impl FromStr for Statistic {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "avg" => return Ok(Statistic::Avg),
            "med" => return Ok(Statistic::Med),
            "min" => return Ok(Statistic::Min),
            "max" => return Ok(Statistic::Max),
            "count" => return Ok(Statistic::Count),
            "rate" => return Ok(Statistic::Rate),
            _ => {}
        }

        let inner = s
            .strip_prefix("p(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| ThresholdParseError::UnknownStatistic(s.to_string()))?;

        let p = inner
            .trim()
            .parse::<f64>()
            .map_err(|_| ThresholdParseError::InvalidPercentile(inner.to_string()))?;
        if !(0.0..=100.0).contains(&p) {
            return Err(ThresholdParseError::InvalidPercentile(inner.to_string()));
        }

        Ok(Statistic::Percentile(p))
    }
}

impl Display for Statistic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Statistic::Percentile(p) => write!(f, "p({p})"),
            Statistic::Avg => write!(f, "avg"),
            Statistic::Med => write!(f, "med"),
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
            Statistic::Count => write!(f, "count"),
            Statistic::Rate => write!(f, "rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Comparator {
    // Two character operators first so `<=` isn't read as `<`.
    const SYMBOLS: [(&'static str, Comparator); 6] = [
        ("<=", Comparator::Le),
        (">=", Comparator::Ge),
        ("==", Comparator::Eq),
        ("!=", Comparator::Ne),
        ("<", Comparator::Lt),
        (">", Comparator::Gt),
    ];

    pub fn holds(self, observed: f64, bound: f64) -> bool {
        match self {
            Comparator::Lt => observed < bound,
            Comparator::Le => observed <= bound,
            Comparator::Gt => observed > bound,
            Comparator::Ge => observed >= bound,
            Comparator::Eq => observed == bound,
            Comparator::Ne => observed != bound,
        }
    }

    fn symbol(self) -> &'static str {
        Self::SYMBOLS
            .iter()
            .find(|(_, c)| *c == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

/// A statistic, a comparator and a bound, written like `p(95) < 15000`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    pub statistic: Statistic,
    pub comparator: Comparator,
    pub bound: f64,
}

impl FromStr for Condition {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (index, symbol, comparator) = Comparator::SYMBOLS
            .iter()
            .filter_map(|(symbol, comparator)| s.find(symbol).map(|i| (i, *symbol, *comparator)))
            .min_by_key(|(i, symbol, _)| (*i, std::cmp::Reverse(symbol.len())))
            .ok_or_else(|| ThresholdParseError::MissingComparator(s.to_string()))?;

        let statistic = s[..index].parse::<Statistic>()?;
        let bound_str = s[index + symbol.len()..].trim();
        let bound = bound_str
            .parse::<f64>()
            .map_err(|_| ThresholdParseError::InvalidBound(bound_str.to_string()))?;

        Ok(Condition {
            statistic,
            comparator,
            bound,
        })
    }
}

impl TryFrom<String> for Condition {
    type Error = ThresholdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.to_string()
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.statistic,
            self.comparator.symbol(),
            self.bound
        )
    }
}

/// An assertion over the samples selected by a tag filter, for example "for samples tagged
/// `test_type=steady_vus` the 95th percentile latency must be below 15000ms".
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub filter: TagFilter,
    pub condition: Condition,
    /// Abort the run as soon as this rule fails at a checkpoint.
    pub abort_on_fail: bool,
    /// Ignore failures of this rule at checkpoints until the run has been going for this long.
    pub delay_abort_eval: Duration,
}

impl ThresholdRule {
    pub fn new(filter: TagFilter, condition: Condition) -> Result<Self, ThresholdParseError> {
        // The outcome restriction alone would select every sample of the run.
        if filter
            .tags()
            .iter()
            .all(|tag| tag.key == EXPECTED_RESPONSE_TAG)
        {
            return Err(ThresholdParseError::EmptyFilter);
        }

        Ok(Self {
            filter,
            condition,
            abort_on_fail: false,
            delay_abort_eval: Duration::ZERO,
        })
    }

    pub fn parse(filter: &str, condition: &str) -> Result<Self, ThresholdParseError> {
        Self::new(filter.parse()?, condition.parse()?)
    }

    pub fn abort_on_fail(mut self, delay_abort_eval: Duration) -> Self {
        self.abort_on_fail = true;
        self.delay_abort_eval = delay_abort_eval;
        self
    }

    pub fn evaluate(&self, aggregator: &MetricsAggregator) -> RuleVerdict {
        let selection = aggregator.select(&self.filter);

        let observed = if selection.is_empty() {
            None
        } else {
            self.condition.statistic.compute(&selection)
        };

        let status = match observed {
            None => RuleStatus::Inconclusive,
            Some(value) if self.condition.comparator.holds(value, self.condition.bound) => {
                RuleStatus::Pass
            }
            Some(_) => RuleStatus::Fail,
        };

        RuleVerdict {
            rule: self.clone(),
            observed,
            samples: selection.count(),
            status,
        }
    }
}

impl Display for ThresholdRule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{{}}} {}", self.filter, self.condition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Pass,
    Fail,
    /// No samples matched the filter, so nothing can be said about the rule.
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
    pub rule: ThresholdRule,
    pub observed: Option<f64>,
    pub samples: u64,
    pub status: RuleStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunVerdict {
    pub rules: Vec<RuleVerdict>,
    pub overall: Verdict,
}

impl RunVerdict {
    pub fn is_pass(&self) -> bool {
        self.overall == Verdict::Passed
    }

    /// Rules that failed, in configuration order.
    pub fn failed_rules(&self) -> impl Iterator<Item = &RuleVerdict> {
        self.rules
            .iter()
            .filter(|verdict| verdict.status == RuleStatus::Fail)
    }
}

/// Evaluate every rule against the current state of the aggregator.
///
/// The run fails if any rule fails. Otherwise it is inconclusive if any rule matched no samples,
/// and passes only when every rule passed.
pub fn evaluate(aggregator: &MetricsAggregator, rules: &[ThresholdRule]) -> RunVerdict {
    let rules = rules
        .iter()
        .map(|rule| rule.evaluate(aggregator))
        .collect::<Vec<_>>();

    let overall = if rules.iter().any(|r| r.status == RuleStatus::Fail) {
        Verdict::Failed
    } else if rules.iter().any(|r| r.status == RuleStatus::Inconclusive) {
        Verdict::Inconclusive
    } else {
        Verdict::Passed
    };

    RunVerdict { rules, overall }
}
