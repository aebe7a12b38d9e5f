use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use gale_core::prelude::{Clock, ShutdownHandle};
use gale_instruments::{evaluate, MetricsAggregator, RuleStatus, RuleVerdict, ThresholdRule};

/// Evaluates thresholds periodically while the run is in progress and aborts the run when a rule
/// marked `abort_on_fail` fails.
pub(crate) struct ThresholdMonitor {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<Option<RuleVerdict>>,
}

impl ThresholdMonitor {
    pub(crate) fn start(
        rules: Vec<ThresholdRule>,
        aggregator: Arc<MetricsAggregator>,
        clock: Arc<dyn Clock>,
        shutdown: ShutdownHandle,
        interval: Duration,
    ) -> anyhow::Result<Self> {
        let (stop, stop_receiver) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("threshold-monitor".to_string())
            .spawn(move || {
                let started = clock.now();
                loop {
                    match stop_receiver.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return None,
                    }

                    if shutdown.is_shutdown() {
                        return None;
                    }

                    let elapsed = clock.now().saturating_sub(started);
                    if let Some(failed) = checkpoint(&rules, &aggregator, elapsed) {
                        log::error!(
                            "Threshold {} failed with {:?} after {:?}, aborting run",
                            failed.rule,
                            failed.observed,
                            elapsed
                        );
                        shutdown.shutdown();
                        return Some(failed);
                    }
                }
            })
            .context("Failed to spawn threshold monitor thread")?;

        Ok(Self { stop, handle })
    }

    /// Stop monitoring. Returns the rule that aborted the run, if any.
    pub(crate) fn stop(self) -> anyhow::Result<Option<RuleVerdict>> {
        drop(self.stop);
        self.handle
            .join()
            .map_err(|e| anyhow::anyhow!("Error joining threshold monitor thread: {:?}", e))
    }
}

/// Evaluate every rule once. Returns the first rule that should abort the run.
fn checkpoint(
    rules: &[ThresholdRule],
    aggregator: &MetricsAggregator,
    elapsed: Duration,
) -> Option<RuleVerdict> {
    let verdict = evaluate(aggregator, rules);
    log::debug!(
        "Threshold checkpoint at {:?} over {} samples: {:?}",
        elapsed,
        aggregator.sample_count(),
        verdict.overall
    );

    verdict.rules.into_iter().find(|r| {
        r.status == RuleStatus::Fail
            && r.rule.abort_on_fail
            && elapsed >= r.rule.delay_abort_eval
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_core::prelude::SystemClock;
    use gale_instruments::{MetricSample, Outcome, TagSet};

    fn slow_aggregator() -> Arc<MetricsAggregator> {
        let aggregator = Arc::new(MetricsAggregator::new());
        aggregator.record(MetricSample::new(
            TagSet::new().with("endpoint", "search"),
            Duration::ZERO,
            Duration::from_secs(20),
            Outcome::Success,
        ));
        aggregator
    }

    #[test]
    fn checkpoint_respects_abort_flag_and_delay() {
        let aggregator = slow_aggregator();
        let rule = ThresholdRule::parse("endpoint=search", "p(95) < 15000").unwrap();

        // Failing, but not allowed to abort
        assert!(checkpoint(&[rule.clone()], &aggregator, Duration::from_secs(60)).is_none());

        let abort_rule = rule.abort_on_fail(Duration::from_secs(10));
        assert!(checkpoint(&[abort_rule.clone()], &aggregator, Duration::from_secs(5)).is_none());

        let failed = checkpoint(&[abort_rule], &aggregator, Duration::from_secs(10)).unwrap();
        assert_eq!(RuleStatus::Fail, failed.status);
    }

    #[test]
    fn monitor_aborts_run_on_failure() {
        let shutdown = ShutdownHandle::new();
        let monitor = ThresholdMonitor::start(
            vec![ThresholdRule::parse("endpoint=search", "max < 1000")
                .unwrap()
                .abort_on_fail(Duration::ZERO)],
            slow_aggregator(),
            Arc::new(SystemClock::new()),
            shutdown.clone(),
            Duration::from_millis(10),
        )
        .unwrap();

        while !shutdown.is_shutdown() {
            std::thread::sleep(Duration::from_millis(5));
        }

        let failed = monitor.stop().unwrap().unwrap();
        assert_eq!(Some(20_000.0), failed.observed);
    }

    #[test]
    fn monitor_stops_quietly() {
        let shutdown = ShutdownHandle::new();
        let monitor = ThresholdMonitor::start(
            vec![ThresholdRule::parse("endpoint=search", "p(95) < 15000").unwrap()],
            slow_aggregator(),
            Arc::new(SystemClock::new()),
            shutdown.clone(),
            Duration::from_secs(60),
        )
        .unwrap();

        assert!(monitor.stop().unwrap().is_none());
        assert!(!shutdown.is_shutdown());
    }
}
