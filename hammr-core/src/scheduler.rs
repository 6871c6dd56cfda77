use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicI64;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;

use hammr_metrics::Registry;

use crate::config::{ScenarioExecutor, ScenarioProfile};
use crate::error::{Error, Result};
use crate::flow::Flow;
use crate::gate::IterationGate;
use crate::http::HttpClient;
use crate::iteration_metrics::IterationMetricIds;
use crate::request_metrics::RequestMetricIds;
use crate::schedule::RampingSchedule;
use crate::worker::{StartSignal, WorkerContext, WorkerWork, run_worker};

/// Shared state for one run: the metric registry with builtins registered,
/// plus the HTTP client every worker borrows.
#[derive(Clone)]
pub struct RunContext {
    pub metrics: Arc<Registry>,
    pub client: Arc<HttpClient>,
    pub request_ids: RequestMetricIds,
    pub iteration_ids: IterationMetricIds,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    pub fn new() -> Self {
        let metrics = Arc::new(Registry::default());
        let request_ids = RequestMetricIds::register(&metrics);
        let iteration_ids = IterationMetricIds::register(&metrics);
        Self {
            metrics,
            client: Arc::new(HttpClient::default()),
            request_ids,
            iteration_ids,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOutcome {
    pub elapsed: Duration,
    pub workers_spawned: u64,
    /// Workers still running at their graceful-stop deadline and aborted.
    pub workers_cancelled: u64,
    pub truncated: bool,
}

/// Run every profile to completion against a shared flow.
///
/// All workers are spawned up front, parked on a barrier, then released
/// together; each profile's `start_offset` is honored by the workers
/// themselves. A worker that outlives its profile window plus `graceful_stop`
/// is aborted and counted in the outcome.
pub async fn run_profiles(
    ctx: &RunContext,
    profiles: &[ScenarioProfile],
    flow: &Flow,
) -> Result<RunOutcome> {
    for profile in profiles {
        profile.validate()?;
    }

    let flow = Arc::new(flow.clone());

    let total_workers: usize = profiles
        .iter()
        .map(|p| p.max_workers().min(usize::MAX as u64) as usize)
        .sum();

    let ready_barrier = Arc::new(Barrier::new(total_workers.saturating_add(1)));
    let start_signal = Arc::new(StartSignal::new());
    let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());

    struct ProfileGate {
        gate: Arc<IterationGate>,
        start_offset: Duration,
    }

    let mut gates: Vec<ProfileGate> = Vec::new();
    let mut handles: Vec<(tokio::task::JoinHandle<Result<()>>, Duration)> =
        Vec::with_capacity(total_workers);
    let mut next_worker_id: u64 = 1;

    for profile in profiles {
        let allocated = profile.max_workers();
        ctx.iteration_ids.record_allocated_workers(
            &ctx.metrics,
            &profile.name,
            allocated.min(i64::MAX as u64) as i64,
        );

        let work = match &profile.executor {
            ScenarioExecutor::FixedCount { duration, .. } => {
                let gate = Arc::new(IterationGate::new(None, Some(*duration)));
                gates.push(ProfileGate {
                    gate: gate.clone(),
                    start_offset: profile.start_offset,
                });
                WorkerWork::Fixed { gate }
            }
            ScenarioExecutor::RampingCount { start, stages } => WorkerWork::Ramping {
                schedule: Arc::new(RampingSchedule::new(*start, stages.clone())),
            },
        };

        let scenario: Arc<str> = Arc::from(profile.name.as_str());
        let scenario_tags: Arc<[(String, String)]> = Arc::from(profile.tags.clone());
        let active = Arc::new(AtomicI64::new(0));

        // Absolute window this profile's workers may occupy, measured from
        // run start.
        let deadline_offset = profile
            .start_offset
            .saturating_add(profile.total_duration())
            .saturating_add(profile.graceful_stop);

        for scenario_worker in 1..=allocated {
            let worker_ctx = WorkerContext {
                worker_id: next_worker_id,
                scenario_worker,
                scenario: scenario.clone(),
                scenario_tags: scenario_tags.clone(),
                think_time: profile.think_time,
                flow: flow.clone(),
                client: ctx.client.clone(),
                metrics: ctx.metrics.clone(),
                request_ids: ctx.request_ids,
                iteration_ids: ctx.iteration_ids,
                work: work.clone(),
                start_offset: profile.start_offset,

                run_started: run_started.clone(),
                active: active.clone(),
                ready_barrier: ready_barrier.clone(),
                start_signal: start_signal.clone(),
            };
            next_worker_id = next_worker_id.saturating_add(1);

            handles.push((tokio::spawn(run_worker(worker_ctx)), deadline_offset));
        }
    }

    // All workers parked; release them from a common zero.
    ready_barrier.wait().await;

    let started = Instant::now();
    let _ = run_started.set(started);
    for pg in gates {
        pg.gate.start_at(started + pg.start_offset);
    }
    start_signal.start();

    let mut outcome = RunOutcome {
        workers_spawned: total_workers as u64,
        ..RunOutcome::default()
    };

    for (handle, deadline_offset) in handles {
        let deadline = started + deadline_offset;
        let remaining = deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout(remaining, handle).await {
            Ok(joined) => match joined {
                Ok(res) => res?,
                Err(err) if err.is_cancelled() => {}
                Err(err) => return Err(Error::Join(err)),
            },
            Err(_) => {
                outcome.workers_cancelled += 1;
                outcome.truncated = true;
            }
        }
    }

    outcome.elapsed = started.elapsed();
    Ok(outcome)
}
