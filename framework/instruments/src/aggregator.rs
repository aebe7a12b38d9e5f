use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::sample::{MetricSample, Outcome};
use crate::stats::{mean, percentile};
use crate::tags::{Tag, TagFilter, TagSet};

/// Samples that share an identical tag set, in the order they were recorded.
#[derive(Debug, Default)]
struct Series {
    samples: Vec<RecordedSample>,
    status_codes: BTreeMap<u16, u64>,
}

#[derive(Debug, Clone, Copy)]
struct RecordedSample {
    at: Duration,
    latency_ms: f64,
    outcome: Outcome,
}

impl Series {
    fn push(&mut self, sample: &MetricSample) {
        self.samples.push(RecordedSample {
            at: sample.timestamp,
            latency_ms: sample.latency_ms(),
            outcome: sample.outcome,
        });
        if let Some(status) = sample.status {
            *self.status_codes.entry(status).or_default() += 1;
        }
    }
}

/// Thread safe sink for samples from every virtual user in a run.
///
/// Samples are grouped by their full tag set, which keeps the number of series small (scenario x
/// group x endpoint in practice) while still allowing any conjunction of tags to be selected later.
/// All latencies are retained so that percentiles are exact.
///
/// Reads take a consistent copy of the matching latencies under the lock and do the sorting
/// outside it, so evaluating thresholds mid-run does not stall virtual users for long.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    series: Mutex<HashMap<TagSet, Series>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: MetricSample) {
        let mut series = self.series.lock();
        match series.get_mut(&sample.tags) {
            Some(existing) => existing.push(&sample),
            None => {
                let mut new_series = Series::default();
                new_series.push(&sample);
                series.insert(sample.tags, new_series);
            }
        }
    }

    /// Total number of samples recorded so far.
    pub fn sample_count(&self) -> u64 {
        self.series
            .lock()
            .values()
            .map(|s| s.samples.len() as u64)
            .sum()
    }

    /// Every sample matching the filter.
    ///
    /// Latencies of failed samples are included unless the filter restricts the outcome with
    /// `expected_response=true`.
    pub fn select(&self, filter: &TagFilter) -> Selection {
        let scope = filter.expected_response();

        let mut selection = Selection::default();
        {
            let series = self.series.lock();
            for (tags, series) in series.iter() {
                if filter.matches(tags) {
                    selection.extend(series, scope);
                }
            }
        }

        selection.sort();
        selection
    }

    /// Statistics for every individual tag seen so far.
    ///
    /// A sample tagged `{scenario=a, endpoint=search}` contributes to both the `scenario=a` and the
    /// `endpoint=search` rows.
    pub fn stats_by_tag(&self) -> BTreeMap<Tag, SeriesStats> {
        let mut by_tag: BTreeMap<Tag, Selection> = BTreeMap::new();
        {
            let series = self.series.lock();
            for (tags, series) in series.iter() {
                for tag in tags.iter() {
                    by_tag.entry(tag).or_default().extend(series, None);
                }
            }
        }

        by_tag
            .into_iter()
            .map(|(tag, mut selection)| {
                selection.sort();
                (tag, selection.stats())
            })
            .collect()
    }

    /// Statistics over every sample regardless of tags.
    pub fn total(&self) -> SeriesStats {
        self.select(&TagFilter::default()).stats()
    }
}

/// Samples picked out of the aggregator by a [TagFilter].
#[derive(Debug, Default, Clone)]
pub struct Selection {
    successes: u64,
    failures: u64,
    latencies_ms: Vec<f64>,
    timestamps: Vec<Duration>,
    status_codes: BTreeMap<u16, u64>,
}

impl Selection {
    fn extend(&mut self, series: &Series, scope: Option<bool>) {
        for sample in &series.samples {
            let success = sample.outcome.is_success();
            if scope.is_some_and(|wanted| wanted != success) {
                continue;
            }

            if success {
                self.successes += 1;
            } else {
                self.failures += 1;
            }
            self.latencies_ms.push(sample.latency_ms);
            self.timestamps.push(sample.at);
        }
        if scope.is_none() {
            for (status, count) in &series.status_codes {
                *self.status_codes.entry(*status).or_default() += count;
            }
        }
    }

    fn sort(&mut self) {
        self.latencies_ms.sort_by(f64::total_cmp);
    }

    pub fn count(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Fraction of selected samples that failed, `None` when nothing was selected.
    pub fn failure_rate(&self) -> Option<f64> {
        if self.is_empty() {
            None
        } else {
            Some(self.failures as f64 / self.count() as f64)
        }
    }

    /// Ascending latencies in milliseconds.
    pub fn latencies_ms(&self) -> &[f64] {
        &self.latencies_ms
    }

    /// Sample timestamps. Within a series they are in recording order, series follow one another
    /// in no particular order.
    pub fn timestamps(&self) -> &[Duration] {
        &self.timestamps
    }

    pub fn first_sample_at(&self) -> Option<Duration> {
        self.timestamps.iter().min().copied()
    }

    pub fn last_sample_at(&self) -> Option<Duration> {
        self.timestamps.iter().max().copied()
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile(&self.latencies_ms, p)
    }

    pub fn mean(&self) -> Option<f64> {
        mean(&self.latencies_ms)
    }

    pub fn min(&self) -> Option<f64> {
        self.latencies_ms.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.latencies_ms.last().copied()
    }

    pub fn stats(&self) -> SeriesStats {
        SeriesStats {
            count: self.count(),
            failures: self.failures,
            min_ms: self.min(),
            max_ms: self.max(),
            avg_ms: self.mean(),
            p50_ms: self.percentile(50.0),
            p90_ms: self.percentile(90.0),
            p95_ms: self.percentile(95.0),
            p99_ms: self.percentile(99.0),
            first_sample_at: self.first_sample_at(),
            last_sample_at: self.last_sample_at(),
            status_codes: self.status_codes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesStats {
    pub count: u64,
    pub failures: u64,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub p50_ms: Option<f64>,
    pub p90_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    /// Run clock time of the earliest and latest selected samples.
    pub first_sample_at: Option<Duration>,
    pub last_sample_at: Option<Duration>,
    pub status_codes: BTreeMap<u16, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sample(tags: TagSet, latency_ms: u64, outcome: Outcome) -> MetricSample {
        MetricSample::new(
            tags,
            Duration::ZERO,
            Duration::from_millis(latency_ms),
            outcome,
        )
    }

    #[test]
    fn failures_count_but_latency_scope_follows_filter() {
        let aggregator = MetricsAggregator::new();
        let tags = TagSet::new().with("endpoint", "search");
        aggregator.record(sample(tags.clone(), 100, Outcome::Success).with_status(200));
        aggregator.record(sample(tags.clone(), 300, Outcome::Success).with_status(200));
        aggregator.record(sample(tags, 5000, Outcome::Failure).with_status(503));

        let all = aggregator.select(&"endpoint=search".parse().unwrap());
        assert_eq!(3, all.count());
        assert_eq!(1, all.failures());
        assert_eq!(Some(5000.0), all.max());

        let ok_only = aggregator.select(&"endpoint=search,expected_response=true".parse().unwrap());
        assert_eq!(2, ok_only.count());
        assert_eq!(0, ok_only.failures());
        assert_eq!(Some(300.0), ok_only.max());

        let failed_only =
            aggregator.select(&"endpoint=search,expected_response=false".parse().unwrap());
        assert_eq!(1, failed_only.count());
        assert_eq!(Some(1.0), failed_only.failure_rate());
    }

    #[test]
    fn filter_selects_across_series() {
        let aggregator = MetricsAggregator::new();
        let steady = TagSet::new().with("test_type", "steady");
        aggregator.record(sample(steady.clone().with("endpoint", "a"), 10, Outcome::Success));
        aggregator.record(sample(steady.with("endpoint", "b"), 20, Outcome::Success));
        aggregator.record(sample(
            TagSet::new().with("test_type", "spike"),
            30,
            Outcome::Success,
        ));

        let selection = aggregator.select(&"test_type=steady".parse().unwrap());
        assert_eq!(vec![10.0, 20.0], selection.latencies_ms());
        assert!(aggregator
            .select(&"test_type=soak".parse().unwrap())
            .is_empty());
        assert_eq!(3, aggregator.total().count);
    }

    #[test]
    fn stats_by_tag_counts_each_tag() {
        let aggregator = MetricsAggregator::new();
        aggregator.record(
            sample(
                TagSet::new().with("scenario", "a").with("endpoint", "x"),
                10,
                Outcome::Failure,
            )
            .with_status(500),
        );
        aggregator.record(sample(
            TagSet::new().with("scenario", "a").with("endpoint", "y"),
            20,
            Outcome::Success,
        ));

        let stats = aggregator.stats_by_tag();
        let scenario = &stats[&Tag::new("scenario", "a")];
        assert_eq!(2, scenario.count);
        assert_eq!(1, scenario.failures);
        assert_eq!(Some(&1), scenario.status_codes.get(&500));

        let endpoint_x = &stats[&Tag::new("endpoint", "x")];
        assert_eq!(1, endpoint_x.count);
        assert_eq!(Some(10.0), endpoint_x.p95_ms);
    }

    #[test]
    fn timestamps_are_kept_in_recording_order() {
        let aggregator = MetricsAggregator::new();
        let tags = TagSet::new().with("endpoint", "search");
        for (at_ms, outcome) in [
            (0, Outcome::Success),
            (250, Outcome::Failure),
            (250, Outcome::Success),
            (900, Outcome::Success),
        ] {
            aggregator.record(MetricSample::new(
                tags.clone(),
                Duration::from_millis(at_ms),
                Duration::from_millis(10),
                outcome,
            ));
        }

        let all = aggregator.select(&"endpoint=search".parse().unwrap());
        assert_eq!(
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(250),
                Duration::from_millis(900)
            ],
            all.timestamps()
        );

        let ok_only = aggregator.select(&"endpoint=search,expected_response=true".parse().unwrap());
        assert_eq!(3, ok_only.timestamps().len());

        let stats = aggregator.total();
        assert_eq!(Some(Duration::ZERO), stats.first_sample_at);
        assert_eq!(Some(Duration::from_millis(900)), stats.last_sample_at);
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let aggregator = Arc::new(MetricsAggregator::new());

        let handles = (0..8)
            .map(|writer| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    let tags = TagSet::new().with("writer", writer.to_string());
                    for i in 0..1_000 {
                        let outcome = if i % 10 == 0 {
                            Outcome::Failure
                        } else {
                            Outcome::Success
                        };
                        aggregator.record(sample(tags.clone(), i, outcome));
                    }
                })
            })
            .collect::<Vec<_>>();

        // Reading while writers are active must be safe.
        let _ = aggregator.total();

        for handle in handles {
            handle.join().unwrap();
        }

        let total = aggregator.total();
        assert_eq!(8_000, total.count);
        assert_eq!(800, total.failures);
        assert_eq!(8_000, aggregator.sample_count());
    }
}
