use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Worker pause between iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkTime {
    #[default]
    None,
    Fixed(Duration),
    /// Uniformly random pause in `[min, max]`.
    Jitter {
        min: Duration,
        max: Duration,
    },
}

#[derive(Debug, Clone)]
pub enum ScenarioExecutor {
    /// Hold a fixed worker count for the full duration.
    FixedCount { vus: u64, duration: Duration },

    /// Ramp the active worker count up/down over time windows.
    RampingCount { start: u64, stages: Vec<Stage> },
}

/// Executor kind (the string form used by config/CLI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ScenarioExecutorKind {
    #[strum(serialize = "fixed-count", serialize = "constant-vus")]
    FixedCount,

    #[strum(serialize = "ramping-count", serialize = "ramping-vus")]
    RampingCount,
}

#[derive(Debug, Clone)]
pub struct ScenarioProfile {
    pub name: String,
    pub executor: ScenarioExecutor,

    /// Activation delay relative to run start; lets profiles overlap.
    pub start_offset: Duration,

    /// Grace window for in-flight iterations after the profile window ends.
    /// Workers still running past it are forcibly cancelled.
    pub graceful_stop: Duration,

    /// Scenario-level tags stamped on every sample this profile's workers emit.
    pub tags: Vec<(String, String)>,

    pub think_time: ThinkTime,
}

impl ScenarioProfile {
    pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

    /// Workers to allocate for this profile.
    pub fn max_workers(&self) -> u64 {
        match &self.executor {
            ScenarioExecutor::FixedCount { vus, .. } => *vus,
            ScenarioExecutor::RampingCount { start, stages } => {
                let max_stage = stages.iter().map(|s| s.target).max().unwrap_or(0);
                max_stage.max(*start)
            }
        }
    }

    /// Wall-clock length of the profile window, excluding `start_offset`.
    pub fn total_duration(&self) -> Duration {
        match &self.executor {
            ScenarioExecutor::FixedCount { duration, .. } => *duration,
            ScenarioExecutor::RampingCount { stages, .. } => stages
                .iter()
                .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match &self.executor {
            ScenarioExecutor::FixedCount { vus, duration } => {
                if *vus == 0 {
                    return Err(Error::InvalidVus);
                }
                if duration.is_zero() {
                    return Err(Error::InvalidDuration);
                }
            }
            ScenarioExecutor::RampingCount { stages, .. } => {
                if stages.is_empty() || self.total_duration().is_zero() {
                    return Err(Error::InvalidStages);
                }
                if self.max_workers() == 0 {
                    return Err(Error::InvalidVus);
                }
            }
        }
        Ok(())
    }
}
