use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use gale_core::prelude::ShutdownHandle;
use gale_instruments::{
    evaluate, render_stats_table, render_verdict_table, MetricsAggregator, RuleStatus,
    RuleVerdict, RunVerdict, SeriesStats, Tag, Verdict,
};
use gale_summary_model::{
    append_run_summary, RunSummary, ScenarioSummary, TagSummary, ThresholdSummary,
};

use crate::checkpoint::ThresholdMonitor;
use crate::context::RunContext;
use crate::definition::{RunDefinition, RunDefinitionBuilder};
use crate::dispatch::Dispatcher;
use crate::executor::Executor;
use crate::scheduler::{ScenarioReport, Scheduler, VuGauge};
use crate::shutdown::start_shutdown_listener;

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_THRESHOLDS_FAILED: i32 = 99;
pub const EXIT_INCONCLUSIVE: i32 = 98;
pub const EXIT_ABORTED: i32 = 105;

/// Why a run stopped before every scenario completed.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortCause {
    /// Ctrl-C or [ShutdownHandle::shutdown] on the handle from [Run::abort_handle].
    Operator,
    /// A rule marked `abort_on_fail` failed at a checkpoint.
    Threshold(RuleVerdict),
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub name: String,
    /// Unix timestamp in seconds.
    pub started_at: i64,
    pub target: String,
    pub scenarios: Vec<ScenarioReport>,
    pub stats_by_tag: BTreeMap<Tag, SeriesStats>,
    pub total: SeriesStats,
    /// Thresholds evaluated over every sample once all virtual users stopped.
    pub verdict: RunVerdict,
    pub aborted: Option<AbortCause>,
}

/// Returned by [RunReport::into_result] when thresholds failed.
#[derive(Debug, thiserror::Error)]
#[error("Run [{}] failed thresholds: {}", .report.name, .failed.join(", "))]
pub struct ThresholdsFailed {
    pub failed: Vec<String>,
    pub report: Box<RunReport>,
}

impl RunReport {
    pub fn iterations(&self) -> u64 {
        self.scenarios.iter().map(|s| s.iterations).sum()
    }

    pub fn scenario(&self, name: &str) -> Option<&ScenarioReport> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Process exit code for this outcome: 0 passed, 99 thresholds failed, 98 inconclusive and
    /// 105 aborted by the operator.
    pub fn exit_code(&self) -> i32 {
        match (&self.aborted, self.verdict.overall) {
            (Some(AbortCause::Operator), _) => EXIT_ABORTED,
            (Some(AbortCause::Threshold(_)), _) | (None, Verdict::Failed) => EXIT_THRESHOLDS_FAILED,
            (None, Verdict::Inconclusive) => EXIT_INCONCLUSIVE,
            (None, Verdict::Passed) => EXIT_PASSED,
        }
    }

    /// Turn failed thresholds into an error so that `?` can be used to fail a test.
    pub fn into_result(self) -> Result<RunReport, ThresholdsFailed> {
        let threshold_abort = matches!(self.aborted, Some(AbortCause::Threshold(_)));
        if self.verdict.overall != Verdict::Failed && !threshold_abort {
            return Ok(self);
        }

        let mut failed = self
            .verdict
            .failed_rules()
            .map(|r| r.rule.to_string())
            .collect::<Vec<_>>();
        if let Some(AbortCause::Threshold(rule)) = &self.aborted {
            let rule = rule.rule.to_string();
            if !failed.contains(&rule) {
                failed.push(rule);
            }
        }

        Err(ThresholdsFailed {
            failed,
            report: Box::new(self),
        })
    }

    pub fn to_summary(&self) -> RunSummary {
        let verdict = match (&self.aborted, self.verdict.overall) {
            (Some(AbortCause::Operator), _) => "aborted",
            (Some(AbortCause::Threshold(_)), _) | (None, Verdict::Failed) => "failed",
            (None, Verdict::Inconclusive) => "inconclusive",
            (None, Verdict::Passed) => "passed",
        };

        RunSummary {
            run_id: self.run_id.clone(),
            run_name: self.name.clone(),
            started_at: self.started_at,
            target: self.target.clone(),
            scenarios: self
                .scenarios
                .iter()
                .map(|s| ScenarioSummary {
                    name: s.name.clone(),
                    executor: s.executor.clone(),
                    iterations: s.iterations,
                    peak_vus: s.peak_vus,
                    interrupted: s.interrupted,
                })
                .collect(),
            tags: self
                .stats_by_tag
                .iter()
                .map(|(tag, stats)| (tag.to_string(), tag_summary(stats)))
                .collect(),
            total: tag_summary(&self.total),
            thresholds: self
                .verdict
                .rules
                .iter()
                .map(|r| ThresholdSummary {
                    rule: r.rule.to_string(),
                    observed: r.observed,
                    status: match r.status {
                        RuleStatus::Pass => "pass",
                        RuleStatus::Fail => "fail",
                        RuleStatus::Inconclusive => "inconclusive",
                    }
                    .to_string(),
                })
                .collect(),
            verdict: verdict.to_string(),
            gale_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

fn tag_summary(stats: &SeriesStats) -> TagSummary {
    TagSummary {
        count: stats.count,
        failures: stats.failures,
        avg_ms: stats.avg_ms,
        p50_ms: stats.p50_ms,
        p90_ms: stats.p90_ms,
        p95_ms: stats.p95_ms,
        p99_ms: stats.p99_ms,
        max_ms: stats.max_ms,
    }
}

/// A prepared run. Creating it validates everything, so once [Run::new] succeeds only runtime
/// failures can stop [Run::execute].
pub struct Run {
    definition: RunDefinition,
    ctx: RunContext,
    schedulers: Vec<Scheduler>,
}

impl Run {
    pub fn new(builder: RunDefinitionBuilder, dispatcher: Arc<dyn Dispatcher>) -> anyhow::Result<Self> {
        let definition = builder.build()?;
        let catalog = definition.catalog.prepare(&definition.target)?;

        let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
        let executor = Arc::new(Executor::new(runtime, ShutdownHandle::new()));
        start_shutdown_listener(&executor);

        let ctx = RunContext::new(
            nanoid::nanoid!(),
            executor,
            Arc::new(MetricsAggregator::new()),
            dispatcher,
            Arc::new(catalog),
            definition.clock.clone(),
            definition.seed,
        );

        let schedulers = definition
            .scenarios
            .iter()
            .map(|spec| Scheduler::new(spec.clone(), ctx.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            definition,
            ctx,
            schedulers,
        })
    }

    pub fn run_id(&self) -> &str {
        self.ctx.run_id()
    }

    /// Live virtual user counts for a scenario.
    pub fn gauge(&self, scenario: &str) -> Option<VuGauge> {
        self.schedulers
            .iter()
            .find(|s| s.name() == scenario)
            .map(Scheduler::gauge)
    }

    /// Handle that aborts the run when triggered, the same as Ctrl-C.
    pub fn abort_handle(&self) -> ShutdownHandle {
        self.ctx.shutdown_handle().clone()
    }

    pub fn aggregator(&self) -> Arc<MetricsAggregator> {
        self.ctx.aggregator().clone()
    }

    /// Run every scenario to completion and evaluate thresholds.
    pub fn execute(self) -> anyhow::Result<RunReport> {
        let Run {
            definition,
            ctx,
            schedulers,
        } = self;

        let started_at = chrono::Utc::now();
        log::info!(
            "Running {} ({}) against {} with {} scenarios",
            definition.name,
            ctx.run_id(),
            definition.target,
            schedulers.len()
        );

        let monitor = if definition.thresholds.is_empty() {
            None
        } else {
            Some(ThresholdMonitor::start(
                definition.thresholds.clone(),
                ctx.aggregator().clone(),
                ctx.clock().clone(),
                ctx.shutdown_handle().clone(),
                definition.checkpoint_interval,
            )?)
        };

        let scenarios = run_scenarios(&ctx, schedulers);

        let threshold_abort = match monitor {
            Some(monitor) => monitor.stop()?,
            None => None,
        };
        let scenarios = scenarios?;

        let aborted = match threshold_abort {
            Some(rule) => Some(AbortCause::Threshold(rule)),
            None if ctx.shutdown_handle().is_shutdown() => Some(AbortCause::Operator),
            None => None,
        };

        let aggregator = ctx.aggregator();
        let report = RunReport {
            run_id: ctx.run_id().to_string(),
            name: definition.name.clone(),
            started_at: started_at.timestamp(),
            target: definition.target.to_string(),
            scenarios,
            stats_by_tag: aggregator.stats_by_tag(),
            total: aggregator.total(),
            verdict: evaluate(aggregator, &definition.thresholds),
            aborted,
        };

        log::info!(
            "Summary for {}:\n{}",
            report.name,
            render_stats_table(&report.stats_by_tag, &report.total)
        );
        if !report.verdict.rules.is_empty() {
            log::info!("Thresholds:\n{}", render_verdict_table(&report.verdict));
        }
        match &report.aborted {
            Some(AbortCause::Operator) => log::warn!("Run was aborted before completing"),
            Some(AbortCause::Threshold(rule)) => {
                log::error!("Run was aborted by threshold {}", rule.rule)
            }
            None => log::info!("Run finished with verdict {:?}", report.verdict.overall),
        }

        if let Some(path) = &definition.summary_path {
            append_run_summary(&report.to_summary(), path)
                .with_context(|| format!("Failed to write run summary to {}", path.display()))?;
        }

        Ok(report)
    }
}

/// Start every scenario on its own thread, honouring start offsets, and wait for all of them.
fn run_scenarios(ctx: &RunContext, schedulers: Vec<Scheduler>) -> anyhow::Result<Vec<ScenarioReport>> {
    let mut handles: Vec<JoinHandle<anyhow::Result<ScenarioReport>>> = Vec::new();
    for scheduler in schedulers {
        let clock = ctx.clock().clone();
        let shutdown = ctx.shutdown_handle().clone();
        let spec = scheduler.spec().clone();

        let spawned = std::thread::Builder::new()
            .name(format!("scenario-{}", spec.name))
            .spawn(move || {
                if !spec.start_time.is_zero() {
                    log::info!("Scenario [{}] starts in {:?}", spec.name, spec.start_time);
                    if !clock.sleep_unless_shutdown(spec.start_time, &shutdown) {
                        log::info!("Scenario [{}] aborted before it started", spec.name);
                        return Ok(ScenarioReport::not_started(&spec));
                    }
                }

                scheduler.run()
            })
            .context("Failed to spawn thread for scenario");

        match spawned {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                // Stop anything already started before giving up.
                ctx.shutdown_handle().shutdown();
                join_scenarios(handles)?;
                return Err(e);
            }
        }
    }

    join_scenarios(handles)
}

fn join_scenarios(
    handles: Vec<JoinHandle<anyhow::Result<ScenarioReport>>>,
) -> anyhow::Result<Vec<ScenarioReport>> {
    let mut reports = Vec::with_capacity(handles.len());
    let mut first_error = None;

    for handle in handles {
        let result = handle
            .join()
            .map_err(|e| anyhow::anyhow!("Error joining thread for scenario: {:?}", e))
            .and_then(|result| result);

        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                log::error!("Scenario failed: {e:?}");
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(reports),
    }
}

/// Run a load test described by `definition`, sending requests through `dispatcher`.
pub fn run(
    definition: RunDefinitionBuilder,
    dispatcher: Arc<dyn Dispatcher>,
) -> anyhow::Result<RunReport> {
    Run::new(definition, dispatcher)?.execute()
}
