use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context;
use gale_core::prelude::{Clock, IterationBudget};

use crate::catalog::PreparedGroup;
use crate::context::RunContext;
use crate::definition::{ExecutorKind, RampShape, ScenarioSpec, Stage};
use crate::error::ConfigError;
use crate::ramp::{target_at, total_duration};
use crate::vu::{vu_id, VirtualUser, VuReport};

/// Live view of the virtual users of one scenario. Cheap to clone and safe to read from any thread.
#[derive(Debug, Clone, Default)]
pub struct VuGauge {
    inner: Arc<GaugeCounters>,
}

#[derive(Debug, Default)]
struct GaugeCounters {
    active: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    spawned: AtomicUsize,
}

impl VuGauge {
    /// Virtual users that are running and have not been asked to stop.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Virtual users whose thread is still running, including those finishing their last
    /// iteration after being retired.
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// The highest value [VuGauge::running] has reached.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn spawned(&self) -> usize {
        self.inner.spawned.load(Ordering::SeqCst)
    }

    fn start_vu(&self, retire: Arc<AtomicBool>) -> RunningGuard {
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let running = self.inner.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(running, Ordering::SeqCst);
        self.inner.spawned.fetch_add(1, Ordering::SeqCst);

        RunningGuard {
            gauge: self.clone(),
            retire,
        }
    }

    /// Stop counting a virtual user as active. Only the first call for a given flag has an effect.
    fn retire(&self, retire: &AtomicBool) {
        if !retire.swap(true, Ordering::AcqRel) {
            self.inner.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Owned by a virtual user thread, updates the gauge when the thread exits for any reason.
struct RunningGuard {
    gauge: VuGauge,
    retire: Arc<AtomicBool>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.gauge.retire(&self.retire);
        self.gauge.inner.running.fetch_sub(1, Ordering::SeqCst);
    }
}

struct VuHandle {
    retire: Arc<AtomicBool>,
    handle: JoinHandle<VuReport>,
}

/// What a scenario did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub name: String,
    pub executor: String,
    /// Iterations completed across every virtual user.
    pub iterations: u64,
    pub vus_spawned: usize,
    pub peak_vus: usize,
    /// The scenario was cut short by an abort.
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl ScenarioReport {
    /// Report for a scenario that was aborted before its start time.
    pub fn not_started(spec: &ScenarioSpec) -> Self {
        Self {
            name: spec.name.clone(),
            executor: spec.executor.to_string(),
            iterations: 0,
            vus_spawned: 0,
            peak_vus: 0,
            interrupted: true,
            elapsed: Duration::ZERO,
        }
    }
}

/// Creates and retires the virtual users of one scenario according to its executor.
pub struct Scheduler {
    spec: Arc<ScenarioSpec>,
    ctx: RunContext,
    groups: Arc<Vec<Arc<PreparedGroup>>>,
    gauge: VuGauge,
    /// Live virtual users, oldest first.
    vus: Vec<VuHandle>,
    /// Retired virtual users that may still be finishing an iteration.
    draining: Vec<VuHandle>,
    reports: Vec<VuReport>,
    next_index: usize,
    aborted: bool,
}

impl Scheduler {
    pub fn new(spec: Arc<ScenarioSpec>, ctx: RunContext) -> Result<Self, ConfigError> {
        spec.validate()?;
        let groups = ctx.catalog().select(&spec.name, spec.groups.as_deref())?;

        Ok(Self {
            spec,
            ctx,
            groups: Arc::new(groups),
            gauge: VuGauge::default(),
            vus: Vec::new(),
            draining: Vec::new(),
            reports: Vec::new(),
            next_index: 0,
            aborted: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &Arc<ScenarioSpec> {
        &self.spec
    }

    pub fn gauge(&self) -> VuGauge {
        self.gauge.clone()
    }

    /// Run the scenario to completion, blocking the calling thread.
    pub fn run(mut self) -> anyhow::Result<ScenarioReport> {
        let started = self.ctx.clock().now();
        log::info!(
            "Starting scenario [{}] with {}",
            self.spec.name,
            self.spec.executor
        );

        let result = match self.spec.executor.clone() {
            ExecutorKind::FixedIterations {
                total_iterations,
                concurrency,
            } => self.run_fixed(total_iterations, concurrency),
            ExecutorKind::ConstantConcurrency {
                concurrency,
                duration,
            } => self.run_constant(concurrency, duration),
            ExecutorKind::RampingConcurrency {
                start_concurrency,
                stages,
                shape,
            } => self.run_ramping(start_concurrency, &stages, shape),
        };

        // Whatever happened, do not leave virtual users behind.
        self.retire_all();
        let joined = self.join_all();
        result?;
        joined?;

        let report = ScenarioReport {
            name: self.spec.name.clone(),
            executor: self.spec.executor.to_string(),
            iterations: self.reports.iter().map(|r| r.iterations).sum(),
            vus_spawned: self.gauge.spawned(),
            peak_vus: self.gauge.peak(),
            interrupted: self.aborted || self.reports.iter().any(|r| r.interrupted),
            elapsed: self.ctx.clock().now().saturating_sub(started),
        };

        log::info!(
            "Finished scenario [{}]: {} iterations by {} virtual users in {:?}{}",
            report.name,
            report.iterations,
            report.vus_spawned,
            report.elapsed,
            if report.interrupted { " (interrupted)" } else { "" }
        );

        Ok(report)
    }

    fn run_fixed(&mut self, total_iterations: u64, concurrency: usize) -> anyhow::Result<()> {
        if total_iterations == 0 {
            log::info!("Scenario [{}] has no iterations to run", self.spec.name);
            return Ok(());
        }

        let budget = Arc::new(IterationBudget::new(total_iterations));
        let vu_count = usize::try_from(total_iterations)
            .unwrap_or(usize::MAX)
            .min(concurrency);
        for _ in 0..vu_count {
            self.spawn_vu(Some(budget.clone()))?;
        }

        // Virtual users stop by themselves once the budget is used up or the run is aborted.
        self.join_all()
    }

    fn run_constant(&mut self, concurrency: usize, duration: Duration) -> anyhow::Result<()> {
        for _ in 0..concurrency {
            self.spawn_vu(None)?;
        }

        let clock = self.ctx.clock().clone();
        let deadline = clock.now() + duration;
        loop {
            let now = clock.now();
            if now >= deadline {
                break;
            }

            self.reap()?;
            if !self.tick(clock.as_ref(), deadline - now) {
                break;
            }
        }

        Ok(())
    }

    fn run_ramping(
        &mut self,
        start_concurrency: usize,
        stages: &[Stage],
        shape: RampShape,
    ) -> anyhow::Result<()> {
        let clock = self.ctx.clock().clone();
        let started = clock.now();
        let total = total_duration(stages);

        loop {
            let elapsed = clock.now().saturating_sub(started);
            let point = target_at(start_concurrency, stages, shape, elapsed);

            self.reap()?;
            if point.finished {
                break;
            }
            self.scale_to(point.target)?;

            if !self.tick(clock.as_ref(), total.saturating_sub(elapsed)) {
                break;
            }
        }

        Ok(())
    }

    /// Wait for the next control tick. Returns false if the run was aborted.
    fn tick(&mut self, clock: &dyn Clock, remaining: Duration) -> bool {
        let wait = self.spec.control_interval.min(remaining);
        if !clock.sleep_unless_shutdown(wait, self.ctx.shutdown_handle()) {
            log::debug!("Scenario [{}] aborted", self.spec.name);
            self.aborted = true;
            return false;
        }
        true
    }

    /// Spawn or retire virtual users so that `target` are active. Retires the newest first and only
    /// spawns while fewer than `target` threads are running.
    fn scale_to(&mut self, target: usize) -> anyhow::Result<()> {
        while self.vus.len() > target {
            if let Some(vu) = self.vus.pop() {
                self.gauge.retire(&vu.retire);
                self.draining.push(vu);
            }
        }

        while self.vus.len() < target && self.gauge.running() < target {
            self.spawn_vu(None)?;
        }

        Ok(())
    }

    fn spawn_vu(&mut self, budget: Option<Arc<IterationBudget>>) -> anyhow::Result<()> {
        let index = self.next_index;
        self.next_index += 1;

        let retire = Arc::new(AtomicBool::new(false));
        let vu = VirtualUser::new(
            self.spec.clone(),
            self.ctx.clone(),
            self.groups.clone(),
            index,
            budget,
            retire.clone(),
        );
        let guard = self.gauge.start_vu(retire.clone());

        let handle = std::thread::Builder::new()
            .name(vu_id(&self.spec.name, index))
            .spawn(move || {
                let _guard = guard;
                vu.run()
            })
            .context("Failed to spawn thread for virtual user")?;

        self.vus.push(VuHandle { retire, handle });
        Ok(())
    }

    /// Join virtual users whose thread has already exited.
    fn reap(&mut self) -> anyhow::Result<()> {
        for list in [&mut self.vus, &mut self.draining] {
            let (finished, running): (Vec<_>, Vec<_>) =
                list.drain(..).partition(|vu| vu.handle.is_finished());
            *list = running;

            for vu in finished {
                self.reports.push(join(vu)?);
            }
        }

        Ok(())
    }

    fn retire_all(&mut self) {
        for vu in self.vus.iter().chain(self.draining.iter()) {
            self.gauge.retire(&vu.retire);
        }
    }

    fn join_all(&mut self) -> anyhow::Result<()> {
        for vu in self.vus.drain(..).chain(self.draining.drain(..)) {
            self.reports.push(join(vu)?);
        }

        Ok(())
    }
}

fn join(vu: VuHandle) -> anyhow::Result<VuReport> {
    vu.handle
        .join()
        .map_err(|e| anyhow::anyhow!("Error joining thread for virtual user: {:?}", e))
}
