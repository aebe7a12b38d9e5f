mod catalog;
mod checkpoint;
mod config;
mod context;
mod definition;
mod dispatch;
mod document;
mod duration;
mod error;
mod executor;
mod init;
mod ramp;
mod randomizer;
mod run;
mod scheduler;
mod shutdown;
mod types;
mod vu;

pub mod prelude {
    pub use crate::catalog::{
        PreparedCatalog, PreparedGroup, RequestSpec, ResolvedRequest, WorkloadCatalog,
        WorkloadGroup, GROUP_TAG,
    };
    pub use crate::config::{
        RunConfig, ScenarioConfig, StageConfig, ThresholdConfig, ITERATIONS_NUMBER_ENV,
        TARGET_HOST_ENV, VUS_NUMBER_ENV,
    };
    pub use crate::context::RunContext;
    pub use crate::definition::{
        ExecutorKind, Pacing, RampShape, RunDefinition, RunDefinitionBuilder, ScenarioSpec, Stage,
        DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CONTROL_INTERVAL, DEFAULT_EXPECTED_STATUSES,
        SCENARIO_TAG,
    };
    pub use crate::dispatch::{DispatchResult, Dispatcher, RequestTimedOut, TimeoutDispatcher};
    pub use crate::document::DocumentFormat;
    pub use crate::duration::{parse_duration, ConfigDuration, DurationParseError};
    pub use crate::error::ConfigError;
    pub use crate::executor::Executor;
    pub use crate::init::init_logging;
    pub use crate::ramp::{target_at, total_duration, RampPoint};
    pub use crate::randomizer::Randomizer;
    pub use crate::run::{
        run, AbortCause, Run, RunReport, ThresholdsFailed, EXIT_ABORTED, EXIT_INCONCLUSIVE,
        EXIT_PASSED, EXIT_THRESHOLDS_FAILED,
    };
    pub use crate::scheduler::{ScenarioReport, Scheduler, VuGauge};
    pub use crate::types::GaleResult;
    pub use crate::vu::VuReport;

    pub use gale_core::prelude::*;
    pub use gale_instruments::{
        evaluate, Comparator, Condition, MetricSample, MetricsAggregator, Outcome, RuleStatus,
        RuleVerdict, RunVerdict, SeriesStats, Statistic, Tag, TagFilter, TagSet, ThresholdRule,
        Verdict, EXPECTED_RESPONSE_TAG,
    };
}
