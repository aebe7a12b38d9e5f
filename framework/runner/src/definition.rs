use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gale_core::prelude::{Clock, SystemClock};
use gale_instruments::{TagSet, ThresholdRule};
use url::Url;

use crate::catalog::WorkloadCatalog;
use crate::error::ConfigError;
use crate::init::init_logging;

/// Tag added to every sample with the name of the scenario that produced it.
pub const SCENARIO_TAG: &str = "scenario";

pub const DEFAULT_EXPECTED_STATUSES: RangeInclusive<u16> = 200..=399;
pub const DEFAULT_CONTROL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// One step of a ramp: move towards `target` virtual users over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RampShape {
    /// Interpolate linearly from the previous target to the stage target.
    #[default]
    Linear,
    /// Jump to the stage target as soon as the stage starts.
    Step,
}

/// How the scheduler creates and retires virtual users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Share a fixed budget of iterations between `concurrency` virtual users.
    FixedIterations {
        total_iterations: u64,
        concurrency: usize,
    },
    /// Keep `concurrency` virtual users busy for `duration`.
    ConstantConcurrency {
        concurrency: usize,
        duration: Duration,
    },
    /// Follow a staged ramp starting from `start_concurrency`.
    RampingConcurrency {
        start_concurrency: usize,
        stages: Vec<Stage>,
        shape: RampShape,
    },
}

impl Display for ExecutorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutorKind::FixedIterations {
                total_iterations,
                concurrency,
            } => write!(f, "fixed-iterations({total_iterations} x {concurrency})"),
            ExecutorKind::ConstantConcurrency {
                concurrency,
                duration,
            } => write!(f, "constant-concurrency({concurrency} for {duration:?})"),
            ExecutorKind::RampingConcurrency {
                start_concurrency,
                stages,
                shape,
            } => {
                write!(f, "ramping-concurrency({start_concurrency}")?;
                for stage in stages {
                    write!(f, " -> {} over {:?}", stage.target, stage.duration)?;
                }
                if *shape == RampShape::Step {
                    write!(f, ", step")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Random pause between two requests of the same iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pacing {
    pub min_sleep: Duration,
    pub max_sleep: Duration,
}

impl Pacing {
    pub fn new(min_sleep: Duration, max_sleep: Duration) -> Self {
        Self {
            min_sleep,
            max_sleep,
        }
    }
}

/// Everything the scheduler needs to know about one scenario. Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSpec {
    pub name: String,
    pub executor: ExecutorKind,
    /// Added to every sample produced by this scenario.
    pub tags: TagSet,
    /// Offset from the start of the run before this scenario starts.
    pub start_time: Duration,
    /// Workload groups to replay, by label. `None` replays every group in the catalog.
    pub groups: Option<Vec<String>>,
    pub pacing: Pacing,
    /// Upper bound of the random delay at the start of every iteration.
    pub start_jitter: Duration,
    /// Pause after the last request of every iteration.
    pub iteration_pause: Duration,
    /// Response statuses counted as a success.
    pub expected_statuses: RangeInclusive<u16>,
    /// How often the scheduler checks deadlines and adjusts the number of virtual users.
    pub control_interval: Duration,
}

impl ScenarioSpec {
    pub fn new(name: impl Into<String>, executor: ExecutorKind) -> Self {
        Self {
            name: name.into(),
            executor,
            tags: TagSet::new(),
            start_time: Duration::ZERO,
            groups: None,
            pacing: Pacing::default(),
            start_jitter: Duration::ZERO,
            iteration_pause: Duration::ZERO,
            expected_statuses: DEFAULT_EXPECTED_STATUSES,
            control_interval: DEFAULT_CONTROL_INTERVAL,
        }
    }

    pub fn fixed_iterations(name: impl Into<String>, total_iterations: u64, concurrency: usize) -> Self {
        Self::new(
            name,
            ExecutorKind::FixedIterations {
                total_iterations,
                concurrency,
            },
        )
    }

    pub fn constant_concurrency(name: impl Into<String>, concurrency: usize, duration: Duration) -> Self {
        Self::new(
            name,
            ExecutorKind::ConstantConcurrency {
                concurrency,
                duration,
            },
        )
    }

    pub fn ramping(name: impl Into<String>, start_concurrency: usize, stages: Vec<Stage>) -> Self {
        Self::new(
            name,
            ExecutorKind::RampingConcurrency {
                start_concurrency,
                stages,
                shape: RampShape::Linear,
            },
        )
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags.merge(&tags);
        self
    }

    pub fn with_start_time(mut self, start_time: Duration) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_groups<S: Into<String>>(mut self, groups: impl IntoIterator<Item = S>) -> Self {
        self.groups = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_pacing(mut self, min_sleep: Duration, max_sleep: Duration) -> Self {
        self.pacing = Pacing::new(min_sleep, max_sleep);
        self
    }

    pub fn with_start_jitter(mut self, start_jitter: Duration) -> Self {
        self.start_jitter = start_jitter;
        self
    }

    pub fn with_iteration_pause(mut self, iteration_pause: Duration) -> Self {
        self.iteration_pause = iteration_pause;
        self
    }

    pub fn with_expected_statuses(mut self, statuses: RangeInclusive<u16>) -> Self {
        self.expected_statuses = statuses;
        self
    }

    pub fn with_control_interval(mut self, control_interval: Duration) -> Self {
        self.control_interval = control_interval;
        self
    }

    /// Only meaningful for ramping scenarios.
    pub fn with_ramp_shape(mut self, ramp_shape: RampShape) -> Self {
        if let ExecutorKind::RampingConcurrency { shape, .. } = &mut self.executor {
            *shape = ramp_shape;
        }
        self
    }

    pub fn is_expected_status(&self, status: u16) -> bool {
        self.expected_statuses.contains(&status)
    }

    /// Tags every sample of this scenario starts from.
    pub fn sample_tags(&self) -> TagSet {
        let mut tags = self.tags.clone();
        tags.insert(SCENARIO_TAG, self.name.clone());
        tags
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.executor {
            ExecutorKind::FixedIterations { concurrency, .. }
            | ExecutorKind::ConstantConcurrency { concurrency, .. } => {
                if *concurrency == 0 {
                    return Err(ConfigError::ZeroConcurrency {
                        scenario: self.name.clone(),
                    });
                }
            }
            ExecutorKind::RampingConcurrency { stages, .. } => {
                if stages.is_empty() {
                    return Err(ConfigError::NoStages {
                        scenario: self.name.clone(),
                    });
                }
            }
        }

        if self.pacing.min_sleep > self.pacing.max_sleep {
            return Err(ConfigError::InvalidPacing {
                scenario: self.name.clone(),
                min: self.pacing.min_sleep,
                max: self.pacing.max_sleep,
            });
        }

        if self.control_interval.is_zero() {
            return Err(ConfigError::ZeroControlInterval {
                scenario: self.name.clone(),
            });
        }

        if self.expected_statuses.is_empty() {
            return Err(ConfigError::NoExpectedStatuses {
                scenario: self.name.clone(),
            });
        }

        Ok(())
    }
}

/// A validated run, ready to be executed.
#[derive(Debug, Clone)]
pub struct RunDefinition {
    pub name: String,
    pub target: Url,
    pub catalog: WorkloadCatalog,
    pub scenarios: Vec<Arc<ScenarioSpec>>,
    pub thresholds: Vec<ThresholdRule>,
    /// How often thresholds are evaluated while the run is in progress.
    pub checkpoint_interval: Duration,
    pub seed: Option<u64>,
    /// JSONL file that the run summary is appended to.
    pub summary_path: Option<PathBuf>,
    pub clock: Arc<dyn Clock>,
}

/// The builder for a run definition.
///
/// Either use it directly, or load a [crate::config::RunConfig] from a file and convert it with
/// [crate::config::RunConfig::into_builder].
pub struct RunDefinitionBuilder {
    name: String,
    target: Option<String>,
    catalog: WorkloadCatalog,
    scenarios: Vec<ScenarioSpec>,
    thresholds: Vec<ThresholdRule>,
    checkpoint_interval: Duration,
    seed: Option<u64>,
    summary_path: Option<PathBuf>,
    clock: Option<Arc<dyn Clock>>,
}

impl RunDefinitionBuilder {
    /// Start a new run definition. Recommended value for the name is `env!("CARGO_PKG_NAME")`.
    pub fn new(name: &str) -> Self {
        init_logging();

        Self {
            name: name.to_string(),
            target: None,
            catalog: WorkloadCatalog::default(),
            scenarios: Vec::new(),
            thresholds: Vec::new(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            seed: None,
            summary_path: None,
            clock: None,
        }
    }

    /// The base URL that request paths are resolved against.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_catalog(mut self, catalog: WorkloadCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn add_scenario(mut self, scenario: ScenarioSpec) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub fn add_threshold(mut self, rule: ThresholdRule) -> Self {
        self.thresholds.push(rule);
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_summary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_path = Some(path.into());
        self
    }

    /// Replace the wall clock, mostly useful for tests.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn scenarios(&self) -> &[ScenarioSpec] {
        &self.scenarios
    }

    pub fn build(self) -> Result<RunDefinition, ConfigError> {
        let target_str = self.target.ok_or(ConfigError::MissingTarget)?;
        let target = Url::parse(&target_str).map_err(|source| ConfigError::InvalidTarget {
            target: target_str.clone(),
            source,
        })?;
        if target.cannot_be_a_base() {
            return Err(ConfigError::UnsupportedTarget(target_str));
        }

        if self.scenarios.is_empty() {
            return Err(ConfigError::NoScenarios);
        }

        let mut names = HashSet::new();
        for scenario in &self.scenarios {
            if !names.insert(scenario.name.as_str()) {
                return Err(ConfigError::DuplicateScenario(scenario.name.clone()));
            }
            scenario.validate()?;
        }

        self.catalog.validate()?;
        for scenario in &self.scenarios {
            for group in scenario.groups.iter().flatten() {
                if !self.catalog.groups.iter().any(|g| &g.label == group) {
                    return Err(ConfigError::UnknownGroup {
                        scenario: scenario.name.clone(),
                        group: group.clone(),
                    });
                }
            }
        }

        Ok(RunDefinition {
            name: self.name,
            target,
            catalog: self.catalog,
            scenarios: self.scenarios.into_iter().map(Arc::new).collect(),
            thresholds: self.thresholds,
            checkpoint_interval: self.checkpoint_interval,
            seed: self.seed,
            summary_path: self.summary_path,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RequestSpec, WorkloadGroup};
    use pretty_assertions::assert_eq;

    fn catalog() -> WorkloadCatalog {
        WorkloadCatalog::new([WorkloadGroup::new(
            "search",
            [RequestSpec::parse("/api/v1/crates?q=serde")],
        )])
    }

    fn builder() -> RunDefinitionBuilder {
        RunDefinitionBuilder::new("definition_test")
            .with_target("http://localhost:8080")
            .with_catalog(catalog())
    }

    #[test]
    fn build_valid_definition() {
        let definition = builder()
            .add_scenario(
                ScenarioSpec::fixed_iterations("steady_iters", 100, 5)
                    .with_tag("test_type", "steady_iters"),
            )
            .add_threshold(ThresholdRule::parse("test_type=steady_iters", "p(95) < 4000").unwrap())
            .build()
            .unwrap();

        assert_eq!("definition_test", definition.name);
        assert_eq!(1, definition.scenarios.len());
        assert_eq!(
            Some("steady_iters"),
            definition.scenarios[0].sample_tags().get(SCENARIO_TAG)
        );
        assert_eq!(DEFAULT_CHECKPOINT_INTERVAL, definition.checkpoint_interval);
    }

    #[test]
    fn reject_invalid_scenarios() {
        let err = builder()
            .add_scenario(ScenarioSpec::constant_concurrency("steady_vus", 0, Duration::from_secs(1)))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroConcurrency { .. }));

        let err = builder()
            .add_scenario(ScenarioSpec::ramping("ramp", 0, vec![]))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::NoStages { .. }));

        let err = builder()
            .add_scenario(
                ScenarioSpec::fixed_iterations("paced", 1, 1)
                    .with_pacing(Duration::from_secs(2), Duration::from_secs(1)),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPacing { .. }));

        let err = builder()
            .add_scenario(ScenarioSpec::fixed_iterations("twice", 1, 1))
            .add_scenario(ScenarioSpec::fixed_iterations("twice", 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateScenario(name) if name == "twice"));

        let err = builder()
            .add_scenario(ScenarioSpec::fixed_iterations("subset", 1, 1).with_groups(["downloads"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownGroup { .. }));
    }

    #[test]
    fn reject_invalid_run_settings() {
        let err = RunDefinitionBuilder::new("no_target")
            .with_catalog(catalog())
            .add_scenario(ScenarioSpec::fixed_iterations("a", 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingTarget));

        let err = builder()
            .with_target("not a url")
            .add_scenario(ScenarioSpec::fixed_iterations("a", 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { .. }));

        let err = builder().build().unwrap_err();
        assert!(matches!(err, ConfigError::NoScenarios));

        let err = builder()
            .with_catalog(WorkloadCatalog::default())
            .add_scenario(ScenarioSpec::fixed_iterations("a", 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCatalog));
    }

    #[test]
    fn display_executors() {
        assert_eq!(
            "fixed-iterations(1000 x 50)",
            ExecutorKind::FixedIterations {
                total_iterations: 1000,
                concurrency: 50
            }
            .to_string()
        );
        assert_eq!(
            "ramping-concurrency(0 -> 100 over 10s -> 0 over 10s)",
            ScenarioSpec::ramping(
                "ramp",
                0,
                vec![
                    Stage::new(Duration::from_secs(10), 100),
                    Stage::new(Duration::from_secs(10), 0)
                ]
            )
            .executor
            .to_string()
        );
    }
}
