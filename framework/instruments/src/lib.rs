mod aggregator;
mod report;
mod sample;
mod stats;
mod tags;
mod threshold;

pub use aggregator::{MetricsAggregator, Selection, SeriesStats};
pub use report::{render_stats_table, render_verdict_table};
pub use sample::{MetricSample, Outcome};
pub use stats::percentile;
pub use tags::{Tag, TagFilter, TagParseError, TagSet, EXPECTED_RESPONSE_TAG};
pub use threshold::{
    evaluate, Comparator, Condition, RuleStatus, RuleVerdict, RunVerdict, Statistic,
    ThresholdParseError, ThresholdRule, Verdict,
};
