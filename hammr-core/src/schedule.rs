use std::time::Duration;

use crate::config::Stage;

/// Piecewise-linear target-worker schedule for a ramping profile.
///
/// Stage boundaries are precomputed as cumulative offsets from profile start;
/// within a stage the target interpolates linearly from the previous stage's
/// target (or `start` for the first stage) to the stage's own target.
#[derive(Debug, Clone)]
pub struct RampingSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl RampingSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Stage index containing `elapsed`, plus the stage's start offset and
    /// boundary targets. `elapsed` must be within the schedule.
    fn stage_at(&self, elapsed: Duration) -> (usize, Duration, u64, u64) {
        let idx = match self
            .cumulative_ends
            .binary_search_by(|end| end.cmp(&elapsed))
        {
            Ok(i) => i,
            Err(i) => i,
        };

        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.cumulative_ends[idx - 1]
        };
        let start_target = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };

        (idx, stage_start, start_target, self.stages[idx].target)
    }

    /// Desired worker count at `elapsed` since profile start.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || elapsed == Duration::ZERO {
            return self.start;
        }

        let total = self.total_duration();
        if elapsed >= total {
            return self.stages.last().map(|s| s.target).unwrap_or(self.start);
        }

        let (idx, stage_start, start_target, end_target) = self.stage_at(elapsed);
        let stage_duration = self.cumulative_ends[idx].saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        if stage_duration.is_zero() {
            return end_target;
        }

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;

        let num = stage_elapsed.as_nanos() as i128;
        let den = stage_duration.as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    /// How long a parked worker with 1-based index `worker_index` should sleep
    /// before re-checking whether it has become active.
    pub fn next_recheck_in(&self, elapsed: Duration, worker_index: u64) -> Duration {
        let default_sleep = Duration::from_millis(50);

        if self.stages.is_empty() {
            return default_sleep;
        }

        let total = self.total_duration();
        if elapsed >= total {
            return Duration::ZERO;
        }

        // Active workers poll quickly so ramp-down is picked up promptly.
        if worker_index <= self.target_at(elapsed) {
            return Duration::from_millis(1);
        }

        let (idx, stage_start, start_target, end_target) = self.stage_at(elapsed);
        let stage_end = self.cumulative_ends[idx];

        // A flat or descending stage can't activate this worker; sleep toward
        // the stage boundary.
        if end_target <= start_target {
            return stage_end.saturating_sub(elapsed).min(default_sleep);
        }

        let start_i = start_target as i128;
        let end_i = end_target as i128;
        let want = worker_index as i128;

        if want <= start_i {
            return Duration::ZERO;
        }
        if want > end_i {
            return stage_end.saturating_sub(elapsed).min(default_sleep);
        }

        // Invert the interpolation: the ramp reaches `want` after
        // (want - start) * stage_duration / (end - start).
        let stage_duration = stage_end.saturating_sub(stage_start);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        let stage_ns = stage_duration.as_nanos() as i128;
        let elapsed_ns = stage_elapsed.as_nanos() as i128;

        let needed_ns = ((want - start_i).saturating_mul(stage_ns) / (end_i - start_i)).max(0);
        let wait_ns = needed_ns.saturating_sub(elapsed_ns).max(0);
        let wait = Duration::from_nanos(wait_ns.min(u64::MAX as i128) as u64);

        wait.min(default_sleep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(secs: u64, target: u64) -> Stage {
        Stage {
            duration: Duration::from_secs(secs),
            target,
        }
    }

    fn load_schedule() -> RampingSchedule {
        RampingSchedule::new(0, vec![stage(30, 10), stage(60, 10), stage(30, 0)])
    }

    #[test]
    fn target_interpolates_linearly_within_a_stage() {
        let s = load_schedule();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(Duration::from_secs(15)), 5);
        assert_eq!(s.target_at(Duration::from_secs(30)), 10);
        // Plateau.
        assert_eq!(s.target_at(Duration::from_secs(60)), 10);
        assert_eq!(s.target_at(Duration::from_secs(90)), 10);
        // Ramp down.
        assert_eq!(s.target_at(Duration::from_secs(105)), 5);
        assert_eq!(s.target_at(Duration::from_secs(120)), 0);
    }

    #[test]
    fn target_never_exceeds_stage_peak() {
        let s = load_schedule();
        let peak = s.stages().iter().map(|st| st.target).max().unwrap_or(0);
        for ms in (0..=120_000).step_by(250) {
            assert!(s.target_at(Duration::from_millis(ms)) <= peak);
        }
    }

    #[test]
    fn target_clamps_past_the_end() {
        let s = load_schedule();
        assert!(s.is_done(Duration::from_secs(120)));
        assert_eq!(s.target_at(Duration::from_secs(300)), 0);

        let up = RampingSchedule::new(0, vec![stage(10, 4)]);
        assert_eq!(up.target_at(Duration::from_secs(99)), 4);
    }

    #[test]
    fn zero_duration_stage_jumps_to_its_target() {
        let s = RampingSchedule::new(0, vec![stage(0, 8), stage(10, 8)]);
        assert_eq!(s.target_at(Duration::from_millis(1)), 8);
    }

    #[test]
    fn nonzero_start_interpolates_down() {
        let s = RampingSchedule::new(10, vec![stage(10, 0)]);
        assert_eq!(s.target_at(Duration::ZERO), 10);
        assert_eq!(s.target_at(Duration::from_secs(5)), 5);
        assert_eq!(s.target_at(Duration::from_secs(10)), 0);
    }

    #[test]
    fn recheck_is_short_for_active_workers() {
        let s = load_schedule();
        // Worker 3 is active at t=15s (target 5).
        assert_eq!(
            s.next_recheck_in(Duration::from_secs(15), 3),
            Duration::from_millis(1)
        );
    }

    #[test]
    fn recheck_waits_for_the_ramp_to_arrive() {
        let s = load_schedule();
        // Worker 10 only activates at t=30s; at t=15s the wait is capped at
        // the default poll interval.
        let wait = s.next_recheck_in(Duration::from_secs(15), 10);
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(50));
    }

    #[test]
    fn recheck_is_zero_once_the_schedule_is_done() {
        let s = load_schedule();
        assert_eq!(s.next_recheck_in(Duration::from_secs(200), 1), Duration::ZERO);
    }
}
