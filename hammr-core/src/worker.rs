use rand::Rng as _;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Barrier, Notify};

use hammr_metrics::Registry;

use crate::config::ThinkTime;
use crate::error::Result;
use crate::flow::{Flow, FlowGroup, HttpCall, ResponseView};
use crate::gate::IterationGate;
use crate::http::{HttpClient, HttpRequest};
use crate::iteration_metrics::{IterationMetricIds, IterationSample};
use crate::request_metrics::{RequestMetricIds, RequestSample};
use crate::schedule::RampingSchedule;

/// One-shot broadcast releasing all workers at the same instant, so profile
/// start offsets are measured from a common zero.
#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        while !self.started.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum WorkerWork {
    Fixed { gate: Arc<IterationGate> },
    Ramping { schedule: Arc<RampingSchedule> },
}

#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub worker_id: u64,
    /// 1-based index within the scenario; ramping activation compares this
    /// against the schedule target.
    pub scenario_worker: u64,
    pub scenario: Arc<str>,
    pub scenario_tags: Arc<[(String, String)]>,
    pub think_time: ThinkTime,
    pub flow: Arc<Flow>,
    pub client: Arc<HttpClient>,
    pub metrics: Arc<Registry>,
    pub request_ids: RequestMetricIds,
    pub iteration_ids: IterationMetricIds,
    pub work: WorkerWork,
    pub start_offset: Duration,

    pub run_started: Arc<OnceLock<Instant>>,
    pub active: Arc<AtomicI64>,
    pub ready_barrier: Arc<Barrier>,
    pub start_signal: Arc<StartSignal>,
}

/// RAII bump of the scenario's active-worker count, peak-tracked into the
/// `vus` gauge.
struct ActiveWorkerGuard<'a> {
    ctx: &'a WorkerContext,
}

impl<'a> ActiveWorkerGuard<'a> {
    fn enter(ctx: &'a WorkerContext) -> Self {
        let now_active = ctx.active.fetch_add(1, Ordering::AcqRel) + 1;
        ctx.iteration_ids
            .record_active_workers(&ctx.metrics, &ctx.scenario, now_active);
        Self { ctx }
    }
}

impl Drop for ActiveWorkerGuard<'_> {
    fn drop(&mut self) {
        self.ctx.active.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) async fn run_worker(ctx: WorkerContext) -> Result<()> {
    ctx.ready_barrier.wait().await;
    ctx.start_signal.wait().await;

    if !ctx.start_offset.is_zero() {
        tokio::time::sleep(ctx.start_offset).await;
    }

    match ctx.work.clone() {
        WorkerWork::Fixed { gate } => {
            while gate.next() {
                run_iteration(&ctx).await;
            }
        }
        WorkerWork::Ramping { schedule } => {
            // Elapsed is measured from the shared run start plus this
            // profile's offset, so all of a scenario's workers agree on
            // where they are in the ramp.
            let anchor = ctx
                .run_started
                .get()
                .map(|s| *s + ctx.start_offset)
                .unwrap_or_else(Instant::now);

            loop {
                let elapsed = anchor.elapsed();
                if schedule.is_done(elapsed) {
                    break;
                }

                if ctx.scenario_worker <= schedule.target_at(elapsed) {
                    run_iteration(&ctx).await;
                } else {
                    let wait = schedule.next_recheck_in(elapsed, ctx.scenario_worker);
                    if wait.is_zero() {
                        continue;
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    Ok(())
}

/// How a group ended: ran every call, or hit a transport error and stopped.
enum GroupOutcome {
    Completed { ok: bool },
    TransportAborted,
}

async fn run_iteration(ctx: &WorkerContext) {
    let _guard = ActiveWorkerGuard::enter(ctx);
    let started = Instant::now();

    let mut success = true;
    for group in &ctx.flow.groups {
        match run_group(ctx, group).await {
            GroupOutcome::Completed { ok } => {
                success &= ok;
                record_group_outcome(ctx, ok);
            }
            GroupOutcome::TransportAborted => {
                success = false;
                record_group_outcome(ctx, false);
                // Transport errors abort the rest of the iteration; later
                // groups run again on the next one.
                break;
            }
        }
    }

    think(ctx.think_time).await;

    ctx.iteration_ids.record_iteration(
        &ctx.metrics,
        IterationSample {
            scenario: &ctx.scenario,
            success,
            duration: started.elapsed(),
        },
    );
}

/// Execute one group. Check failures and failure statuses are recorded but
/// don't short-circuit; a transport error aborts the iteration early after
/// recording the failed request and its checks.
async fn run_group(ctx: &WorkerContext, group: &FlowGroup) -> GroupOutcome {
    let mut ok = true;

    for call in &group.calls {
        let url = resolve_url(call);
        let extra_tags = merged_tags(ctx, call);
        let extra: Vec<(&str, &str)> = extra_tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let req = HttpRequest {
            method: call.method.clone(),
            url: url.clone(),
            headers: call.headers.clone(),
            body: bytes::Bytes::new(),
            timeout: call.timeout,
        };
        let bytes_sent = estimate_request_bytes(&req);

        let started = Instant::now();
        let outcome = ctx.client.request(req).await;
        let duration = started.elapsed();

        match outcome {
            Ok(res) => {
                let failed = !(200..400).contains(&res.status);
                ctx.request_ids.record_request(
                    &ctx.metrics,
                    RequestSample {
                        scenario: &ctx.scenario,
                        group: &group.name,
                        failed,
                        duration,
                        bytes_received: res.body.len() as u64,
                        bytes_sent,
                        error_kind: None,
                    },
                    &extra,
                );

                let view = ResponseView::from(res);
                record_latency_trend(ctx, call, duration, &extra);

                for check in &call.checks {
                    let passed = check.run(&view);
                    ok &= passed;
                    ctx.request_ids.record_check(
                        &ctx.metrics,
                        &ctx.scenario,
                        &group.name,
                        &check.name,
                        passed,
                        &extra,
                    );
                }
                ok &= !failed;
            }
            Err(err) => {
                let kind = err.transport_error_kind().to_string();
                ctx.request_ids.record_request(
                    &ctx.metrics,
                    RequestSample {
                        scenario: &ctx.scenario,
                        group: &group.name,
                        failed: true,
                        duration,
                        bytes_received: 0,
                        bytes_sent,
                        error_kind: Some(&kind),
                    },
                    &extra,
                );

                // Checks never ran; count them as failed so the pass-rate
                // reflects the outage.
                for check in &call.checks {
                    ctx.request_ids.record_check(
                        &ctx.metrics,
                        &ctx.scenario,
                        &group.name,
                        &check.name,
                        false,
                        &extra,
                    );
                }

                return GroupOutcome::TransportAborted;
            }
        }
    }

    GroupOutcome::Completed { ok }
}

fn record_group_outcome(ctx: &WorkerContext, group_ok: bool) {
    if let Some(name) = &ctx.flow.ok_rate_metric {
        let id = ctx
            .metrics
            .register(name, hammr_metrics::MetricKind::Rate);
        let tags = ctx
            .metrics
            .resolve_tags(&[("scenario", &ctx.scenario)]);
        if let Some(h) = ctx.metrics.handle(id, tags) {
            h.add_rate(group_ok);
        }
    }

    if !group_ok
        && let Some(name) = &ctx.flow.errors_metric
    {
        let id = ctx
            .metrics
            .register(name, hammr_metrics::MetricKind::Counter);
        let tags = ctx
            .metrics
            .resolve_tags(&[("scenario", &ctx.scenario)]);
        if let Some(h) = ctx.metrics.handle(id, tags) {
            h.increment(1);
        }
    }
}

fn record_latency_trend(
    ctx: &WorkerContext,
    call: &HttpCall,
    duration: Duration,
    extra: &[(&str, &str)],
) {
    let Some(name) = &call.latency_trend else {
        return;
    };
    let id = ctx.metrics.register(name, hammr_metrics::MetricKind::Trend);

    let mut tags: Vec<(&str, &str)> = Vec::with_capacity(1 + extra.len());
    tags.push(("scenario", &ctx.scenario));
    tags.extend(extra.iter().copied().filter(|(k, _)| *k != "scenario"));

    let resolved = ctx.metrics.resolve_tags(&tags);
    if let Some(h) = ctx.metrics.handle(id, resolved) {
        h.observe_trend(duration.as_secs_f64() * 1_000.0);
    }
}

fn resolve_url(call: &HttpCall) -> String {
    match call.random_id_max {
        Some(max) if max > 0 => {
            let id = rand::thread_rng().gen_range(1..=max);
            call.url.replace("{id}", &id.to_string())
        }
        _ => call.url.clone(),
    }
}

fn merged_tags(ctx: &WorkerContext, call: &HttpCall) -> Vec<(String, String)> {
    merge_tags(&ctx.scenario_tags, &call.tags)
}

/// Scenario tags win over call tags on key collision.
fn merge_tags(
    scenario_tags: &[(String, String)],
    call_tags: &[(String, String)],
) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> =
        Vec::with_capacity(scenario_tags.len() + call_tags.len());
    out.extend(scenario_tags.iter().cloned());
    for (k, v) in call_tags {
        if !out.iter().any(|(ek, _)| ek == k) {
            out.push((k.clone(), v.clone()));
        }
    }
    out
}

fn estimate_request_bytes(req: &HttpRequest) -> u64 {
    let header_bytes: usize = req.headers.iter().map(|(k, v)| k.len() + v.len() + 4).sum();
    (req.method.as_str().len() + req.url.len() + header_bytes + req.body.len() + 12) as u64
}

async fn think(think_time: ThinkTime) {
    match think_time {
        ThinkTime::None => {}
        ThinkTime::Fixed(d) => tokio::time::sleep(d).await,
        ThinkTime::Jitter { min, max } => {
            let (lo, hi) = (min.min(max), min.max(max));
            let ms = rand::thread_rng().gen_range(lo.as_millis()..=hi.as_millis());
            tokio::time::sleep(Duration::from_millis(ms.min(u64::MAX as u128) as u64)).await;
        }
    }
}
