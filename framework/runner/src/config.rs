use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use gale_instruments::{TagSet, ThresholdRule};
use serde::Deserialize;

use crate::catalog::WorkloadCatalog;
use crate::definition::{RampShape, RunDefinitionBuilder, ScenarioSpec, Stage};
use crate::document::{read_document, DocumentFormat};
use crate::duration::ConfigDuration;
use crate::error::ConfigError;

/// Overrides the run target.
pub const TARGET_HOST_ENV: &str = "TARGET_HOST";
/// Overrides the number of virtual users of fixed-iterations and constant-concurrency scenarios.
pub const VUS_NUMBER_ENV: &str = "VUS_NUMBER";
/// Overrides the iteration budget of fixed-iterations scenarios.
pub const ITERATIONS_NUMBER_ENV: &str = "ITERATIONS_NUMBER";

/// A run as described in a configuration file.
///
/// ```yaml
/// name: package_registry
/// target: http://localhost:8080
/// catalog: catalog.yaml
/// scenarios:
///   - name: steady_iters
///     executor: fixed-iterations
///     vus: 50
///     iterations: 1000
///     tags: { test_type: steady_iters }
///     iteration_pause: 1s
/// thresholds:
///   - filter: test_type=steady_iters
///     condition: p(95) < 4000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub name: String,
    #[serde(default)]
    pub target: Option<String>,
    /// Path to the workload catalog, relative to the configuration file.
    pub catalog: PathBuf,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub checkpoint_interval: Option<ConfigDuration>,
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
    pub scenarios: Vec<ScenarioConfig>,
    #[serde(default)]
    pub thresholds: Vec<ThresholdConfig>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub executor: String,
    #[serde(default)]
    pub vus: Option<usize>,
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub duration: Option<ConfigDuration>,
    #[serde(default)]
    pub start_vus: Option<usize>,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// `linear` or `step`.
    #[serde(default)]
    pub ramp: Option<String>,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub start_time: Option<ConfigDuration>,
    #[serde(default)]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub min_sleep: Option<ConfigDuration>,
    #[serde(default)]
    pub max_sleep: Option<ConfigDuration>,
    #[serde(default)]
    pub start_jitter: Option<ConfigDuration>,
    #[serde(default)]
    pub iteration_pause: Option<ConfigDuration>,
    /// A single status such as `200` or a range such as `200-299`.
    #[serde(default)]
    pub expected_statuses: Option<String>,
    #[serde(default)]
    pub control_interval: Option<ConfigDuration>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StageConfig {
    pub duration: ConfigDuration,
    pub target: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    pub filter: String,
    pub condition: String,
    #[serde(default)]
    pub abort_on_fail: bool,
    #[serde(default)]
    pub delay_abort_eval: Option<ConfigDuration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutorFamily {
    FixedIterations,
    ConstantConcurrency,
    RampingConcurrency,
}

impl ExecutorFamily {
    fn parse(name: &str) -> Result<Self, ConfigError> {
        match name.trim() {
            "fixed-iterations" | "shared-iterations" => Ok(ExecutorFamily::FixedIterations),
            "constant-concurrency" | "constant-vus" => Ok(ExecutorFamily::ConstantConcurrency),
            "ramping-concurrency" | "ramping-vus" => Ok(ExecutorFamily::RampingConcurrency),
            other => Err(ConfigError::UnknownExecutor(other.to_string())),
        }
    }
}

impl RunConfig {
    /// Load a configuration file. The format is picked from the file extension.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: RunConfig = read_document(path)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn parse(content: &str, format: DocumentFormat) -> anyhow::Result<Self> {
        format.parse(content)
    }

    /// Apply `TARGET_HOST`, `VUS_NUMBER` and `ITERATIONS_NUMBER` using `lookup` to read variables.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(target) = lookup(TARGET_HOST_ENV) {
            log::info!("Using target {target} from {TARGET_HOST_ENV}");
            self.target = Some(target);
        }

        let vus = lookup(VUS_NUMBER_ENV)
            .map(|value| parse_env::<usize>(VUS_NUMBER_ENV, value))
            .transpose()?;
        let iterations = lookup(ITERATIONS_NUMBER_ENV)
            .map(|value| parse_env::<u64>(ITERATIONS_NUMBER_ENV, value))
            .transpose()?;

        for scenario in &mut self.scenarios {
            match ExecutorFamily::parse(&scenario.executor)? {
                ExecutorFamily::FixedIterations => {
                    if vus.is_some() {
                        scenario.vus = vus;
                    }
                    if iterations.is_some() {
                        scenario.iterations = iterations;
                    }
                }
                ExecutorFamily::ConstantConcurrency => {
                    if vus.is_some() {
                        scenario.vus = vus;
                    }
                }
                ExecutorFamily::RampingConcurrency => {}
            }
        }

        Ok(())
    }

    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|name| std::env::var(name).ok())
    }

    /// Load the catalog and convert into a [RunDefinitionBuilder], which can be customised further.
    pub fn into_builder(self) -> anyhow::Result<RunDefinitionBuilder> {
        let catalog_path = self.resolve_path(&self.catalog);
        let catalog = WorkloadCatalog::load(&catalog_path)
            .with_context(|| format!("Failed to load workload catalog for run [{}]", self.name))?;

        let mut builder = RunDefinitionBuilder::new(&self.name).with_catalog(catalog);

        if let Some(target) = &self.target {
            builder = builder.with_target(target.clone());
        }
        if let Some(seed) = self.seed {
            builder = builder.with_seed(seed);
        }
        if let Some(interval) = self.checkpoint_interval {
            builder = builder.with_checkpoint_interval(interval.into());
        }
        if let Some(path) = &self.summary_path {
            builder = builder.with_summary_path(self.resolve_path(path));
        }

        for scenario in &self.scenarios {
            builder = builder.add_scenario(scenario.to_spec()?);
        }
        for threshold in &self.thresholds {
            builder = builder.add_threshold(threshold.to_rule()?);
        }

        Ok(builder)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ScenarioConfig {
    pub fn to_spec(&self) -> Result<ScenarioSpec, ConfigError> {
        let name = self.name.clone();
        let mut spec = match ExecutorFamily::parse(&self.executor)? {
            ExecutorFamily::FixedIterations => ScenarioSpec::fixed_iterations(
                name,
                self.iterations.ok_or_else(|| self.missing("iterations"))?,
                self.vus.unwrap_or(1),
            ),
            ExecutorFamily::ConstantConcurrency => ScenarioSpec::constant_concurrency(
                name,
                self.vus.unwrap_or(1),
                self.duration.ok_or_else(|| self.missing("duration"))?.into(),
            ),
            ExecutorFamily::RampingConcurrency => {
                let stages = self
                    .stages
                    .iter()
                    .map(|s| Stage::new(s.duration.into(), s.target))
                    .collect();
                let shape = match self.ramp.as_deref().map(str::trim) {
                    None | Some("linear") => RampShape::Linear,
                    Some("step") => RampShape::Step,
                    Some(other) => return Err(ConfigError::UnknownRampShape(other.to_string())),
                };
                ScenarioSpec::ramping(name, self.start_vus.unwrap_or(0), stages).with_ramp_shape(shape)
            }
        };

        spec = spec
            .with_tags(self.tags.clone())
            .with_start_time(duration_or_zero(self.start_time))
            .with_pacing(
                duration_or_zero(self.min_sleep),
                duration_or_zero(self.max_sleep.or(self.min_sleep)),
            )
            .with_start_jitter(duration_or_zero(self.start_jitter))
            .with_iteration_pause(duration_or_zero(self.iteration_pause));

        if let Some(groups) = &self.groups {
            spec = spec.with_groups(groups.iter().cloned());
        }
        if let Some(statuses) = &self.expected_statuses {
            spec = spec.with_expected_statuses(parse_statuses(statuses)?);
        }
        if let Some(interval) = self.control_interval {
            spec = spec.with_control_interval(interval.into());
        }

        Ok(spec)
    }

    fn missing(&self, field: &'static str) -> ConfigError {
        ConfigError::MissingField {
            scenario: self.name.clone(),
            field,
        }
    }
}

impl ThresholdConfig {
    pub fn to_rule(&self) -> Result<ThresholdRule, ConfigError> {
        let rule = ThresholdRule::parse(&self.filter, &self.condition).map_err(|source| {
            ConfigError::InvalidThreshold {
                rule: format!("{{{}}} {}", self.filter, self.condition),
                source,
            }
        })?;

        Ok(if self.abort_on_fail {
            rule.abort_on_fail(duration_or_zero(self.delay_abort_eval))
        } else {
            rule
        })
    }
}

fn duration_or_zero(value: Option<ConfigDuration>) -> Duration {
    value.map(Duration::from).unwrap_or_default()
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    let parsed = value.trim().parse().ok();
    parsed.ok_or(ConfigError::InvalidEnv { name, value })
}

fn parse_statuses(value: &str) -> Result<std::ops::RangeInclusive<u16>, ConfigError> {
    let invalid = || ConfigError::InvalidStatus(value.to_string());
    let parse = |s: &str| s.trim().parse::<u16>().map_err(|_| invalid());

    let range = match value.split_once('-') {
        Some((start, end)) => parse(start)?..=parse(end)?,
        None => {
            let status = parse(value)?;
            status..=status
        }
    };

    if range.is_empty() {
        return Err(invalid());
    }
    Ok(range)
}
