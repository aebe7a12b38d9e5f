use std::time::Duration;

use crate::definition::{RampShape, Stage};

/// Where a ramp is at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RampPoint {
    /// Number of virtual users that should be active.
    pub target: usize,
    /// Index of the stage in progress, `None` once every stage has completed.
    pub stage: Option<usize>,
    pub finished: bool,
}

/// Total time taken by all stages.
pub fn total_duration(stages: &[Stage]) -> Duration {
    stages.iter().map(|s| s.duration).sum()
}

/// Compute the ramp target `elapsed` after the scenario started.
///
/// With [RampShape::Linear] the target moves linearly from the previous stage target to the current
/// one, rounded down. With [RampShape::Step] the target jumps when the stage starts. A stage with
/// zero duration is an instant jump to its target. The result never exceeds the larger of the
/// previous and current stage targets.
pub fn target_at(start: usize, stages: &[Stage], shape: RampShape, elapsed: Duration) -> RampPoint {
    let mut previous = start;
    let mut stage_start = Duration::ZERO;

    for (index, stage) in stages.iter().enumerate() {
        let stage_end = stage_start + stage.duration;
        if elapsed < stage_end {
            let target = match shape {
                RampShape::Step => stage.target,
                RampShape::Linear => {
                    let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                    let value = previous as f64 + (stage.target as f64 - previous as f64) * progress;
                    let upper = previous.max(stage.target);
                    (value.floor().max(0.0) as usize).min(upper)
                }
            };

            return RampPoint {
                target,
                stage: Some(index),
                finished: false,
            };
        }

        previous = stage.target;
        stage_start = stage_end;
    }

    RampPoint {
        target: previous,
        stage: None,
        finished: true,
    }
}
