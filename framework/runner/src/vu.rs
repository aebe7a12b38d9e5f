use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gale_core::prelude::{IterationBudget, ShutdownSignalError};
use gale_instruments::{MetricSample, Outcome, TagSet};

use crate::catalog::{PreparedGroup, ResolvedRequest};
use crate::context::RunContext;
use crate::definition::ScenarioSpec;
use crate::randomizer::Randomizer;

/// What a virtual user did before it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VuReport {
    pub iterations: u64,
    /// The virtual user was stopped by an abort rather than finishing normally.
    pub interrupted: bool,
}

/// Replays workload groups in a loop until it runs out of iterations, is retired by the scheduler
/// or the run is aborted.
pub(crate) struct VirtualUser {
    id: String,
    spec: Arc<ScenarioSpec>,
    ctx: RunContext,
    groups: Arc<Vec<Arc<PreparedGroup>>>,
    budget: Option<Arc<IterationBudget>>,
    retire: Arc<AtomicBool>,
    randomizer: Randomizer,
    base_tags: TagSet,
}

impl VirtualUser {
    pub(crate) fn new(
        spec: Arc<ScenarioSpec>,
        ctx: RunContext,
        groups: Arc<Vec<Arc<PreparedGroup>>>,
        index: usize,
        budget: Option<Arc<IterationBudget>>,
        retire: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: vu_id(&spec.name, index),
            randomizer: Randomizer::for_vu(ctx.seed(), &spec.name, index),
            base_tags: spec.sample_tags(),
            spec,
            ctx,
            groups,
            budget,
            retire,
        }
    }

    pub(crate) fn run(mut self) -> VuReport {
        log::debug!("Starting {}", self.id);

        let mut report = VuReport::default();
        loop {
            if self.retire.load(Ordering::Acquire) {
                log::debug!("Retiring {}", self.id);
                break;
            }

            if self.ctx.shutdown_handle().is_shutdown() {
                report.interrupted = true;
                break;
            }

            if let Some(budget) = &self.budget {
                if !budget.try_claim() {
                    break;
                }
            }

            match self.run_iteration() {
                Ok(()) => report.iterations += 1,
                Err(_) => {
                    report.interrupted = true;
                    break;
                }
            }
        }

        log::debug!(
            "Stopping {} after {} iterations",
            self.id,
            report.iterations
        );
        report
    }

    fn run_iteration(&mut self) -> Result<(), ShutdownSignalError> {
        let jitter = self.randomizer.duration_up_to(self.spec.start_jitter);
        self.pause(jitter)?;

        let groups = self.groups.clone();
        let mut first_request = true;
        for group in groups.iter() {
            let order = if group.shuffle {
                self.randomizer.shuffled(&group.requests)
            } else {
                group.requests.clone()
            };

            for request in order {
                if !first_request {
                    let pacing = self
                        .randomizer
                        .duration_between(self.spec.pacing.min_sleep, self.spec.pacing.max_sleep);
                    self.pause(pacing)?;
                }
                first_request = false;

                self.issue(&request)?;
            }
        }

        self.pause(self.spec.iteration_pause)
    }

    fn issue(&self, request: &ResolvedRequest) -> Result<(), ShutdownSignalError> {
        let clock = self.ctx.clock();

        let started = clock.now();
        let result = self
            .ctx
            .executor()
            .execute_in_place(self.ctx.dispatcher().dispatch(request));
        let latency = clock.now().saturating_sub(started);

        let (outcome, status) = match result {
            Ok(status) if self.spec.is_expected_status(status) => (Outcome::Success, Some(status)),
            Ok(status) => {
                log::debug!("Unexpected status {status} from {}", request.url);
                (Outcome::Failure, Some(status))
            }
            Err(e) if e.is::<ShutdownSignalError>() => {
                // Aborted in flight, nothing was measured.
                return Err(ShutdownSignalError::default());
            }
            Err(e) => {
                log::debug!("Request to {} failed: {e:?}", request.url);
                (Outcome::Failure, None)
            }
        };

        let mut tags = self.base_tags.clone();
        tags.merge(&request.tags);

        let mut sample = MetricSample::new(tags, started, latency, outcome);
        if let Some(status) = status {
            sample = sample.with_status(status);
        }
        self.ctx.aggregator().record(sample);

        Ok(())
    }

    fn pause(&self, duration: Duration) -> Result<(), ShutdownSignalError> {
        let shutdown = self.ctx.shutdown_handle();
        if duration.is_zero() {
            if shutdown.is_shutdown() {
                return Err(ShutdownSignalError::default());
            }
            return Ok(());
        }

        if self.ctx.clock().sleep_unless_shutdown(duration, shutdown) {
            Ok(())
        } else {
            Err(ShutdownSignalError::default())
        }
    }
}

pub(crate) fn vu_id(scenario: &str, index: usize) -> String {
    format!("vu-{scenario}-{index}")
}
