use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use hammr_metrics::{MetricAggregate, MetricKind, Registry, TrendSummary};

use crate::scheduler::RunOutcome;
use crate::thresholds::ThresholdSpec;

/// Final, serializable snapshot of a run. Field shapes follow the common
/// load-tool summary layout so downstream tooling can consume it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub state: RunState,
    /// Metric name (or `metric{filter}` source for filtered threshold
    /// series) to its merged aggregate. BTreeMap keeps output deterministic.
    pub metrics: BTreeMap<String, MetricReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub test_run_duration_ms: f64,
    pub workers_spawned: u64,
    pub workers_cancelled: u64,
    /// True when the graceful-stop window expired and stragglers were
    /// aborted; aggregates then undercount in-flight work.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricReport {
    #[serde(rename = "type")]
    pub kind: String,
    pub values: MetricValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValues {
    Rate {
        rate: f64,
        passes: u64,
        fails: u64,
    },
    Counter {
        count: u64,
        /// Per-second rate over the whole run.
        rate: f64,
    },
    Gauge {
        value: i64,
    },
    Trend {
        avg: Option<f64>,
        min: Option<f64>,
        med: Option<f64>,
        max: Option<f64>,
        #[serde(rename = "p(90)")]
        p90: Option<f64>,
        #[serde(rename = "p(95)")]
        p95: Option<f64>,
        #[serde(rename = "p(99)")]
        p99: Option<f64>,
        count: u64,
    },
}

/// Assemble the run summary from the registry's final state.
///
/// Every registered metric appears once under its bare name with all series
/// merged. Thresholds with a tag filter additionally contribute a decorated
/// entry under their full source (`checks{endpoint:getPost}`) holding just
/// the filtered aggregate, so reports can show exactly what the threshold
/// was judged on.
pub fn build_run_summary(
    metrics: &Registry,
    outcome: &RunOutcome,
    thresholds: &[ThresholdSpec],
) -> RunSummary {
    let duration_s = outcome.elapsed.as_secs_f64();

    let mut out: BTreeMap<String, MetricReport> = BTreeMap::new();

    for (name, kind, agg) in metrics.snapshot() {
        out.insert(
            name,
            MetricReport {
                kind: kind.to_string(),
                values: aggregate_to_values(&agg, duration_s),
            },
        );
    }

    for spec in thresholds {
        if spec.filter.is_empty() {
            continue;
        }
        let Some((id, kind)) = metrics.lookup(&spec.metric) else {
            continue;
        };

        let filter_pairs: Vec<(&str, &str)> = spec
            .filter
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let filter = metrics.resolve_tags(&filter_pairs);

        if let Some(agg) = metrics.aggregate(id, &filter) {
            out.insert(
                spec.source(),
                MetricReport {
                    kind: kind.to_string(),
                    values: aggregate_to_values(&agg, duration_s),
                },
            );
        }
    }

    RunSummary {
        state: RunState {
            test_run_duration_ms: duration_s * 1_000.0,
            workers_spawned: outcome.workers_spawned,
            workers_cancelled: outcome.workers_cancelled,
            truncated: outcome.truncated,
        },
        metrics: out,
    }
}

fn aggregate_to_values(agg: &MetricAggregate, duration_s: f64) -> MetricValues {
    match agg {
        MetricAggregate::Counter { total } => MetricValues::Counter {
            count: *total,
            rate: if duration_s > 0.0 {
                *total as f64 / duration_s
            } else {
                0.0
            },
        },
        MetricAggregate::Gauge { value } => MetricValues::Gauge { value: *value },
        MetricAggregate::Rate { total, hits } => MetricValues::Rate {
            rate: if *total > 0 {
                *hits as f64 / *total as f64
            } else {
                0.0
            },
            passes: *hits,
            fails: total.saturating_sub(*hits),
        },
        MetricAggregate::Trend(summary) => trend_values(summary),
    }
}

fn trend_values(s: &TrendSummary) -> MetricValues {
    MetricValues::Trend {
        avg: s.mean,
        min: s.min,
        med: s.med,
        max: s.max,
        p90: s.p90,
        p95: s.p95,
        p99: s.p99,
        count: s.count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn outcome(secs: u64) -> RunOutcome {
        RunOutcome {
            elapsed: Duration::from_secs(secs),
            workers_spawned: 2,
            workers_cancelled: 0,
            truncated: false,
        }
    }

    fn seeded_registry() -> Registry {
        let reg = Registry::default();

        let reqs = reg.register("http_reqs", MetricKind::Counter);
        let tags = reg.resolve_tags(&[("scenario", "smoke")]);
        if let Some(h) = reg.handle(reqs, tags.clone()) {
            h.increment(100);
        }

        let checks = reg.register("checks", MetricKind::Rate);
        let get_post = reg.resolve_tags(&[("endpoint", "getPost")]);
        if let Some(h) = reg.handle(checks, get_post) {
            for i in 0..10 {
                h.add_rate(i != 0);
            }
        }
        if let Some(h) = reg.handle(checks, tags) {
            for _ in 0..10 {
                h.add_rate(true);
            }
        }

        let duration = reg.register("http_req_duration", MetricKind::Trend);
        let t = reg.resolve_tags(&[("scenario", "smoke")]);
        if let Some(h) = reg.handle(duration, t) {
            for v in [100.0, 200.0, 300.0, 400.0, 500.0] {
                h.observe_trend(v);
            }
        }

        reg
    }

    #[test]
    fn counter_rate_is_per_second_over_the_run() {
        let reg = seeded_registry();
        let summary = build_run_summary(&reg, &outcome(10), &[]);

        let Some(report) = summary.metrics.get("http_reqs") else {
            panic!("http_reqs missing");
        };
        assert_eq!(report.kind, "counter");
        match &report.values {
            MetricValues::Counter { count, rate } => {
                assert_eq!(*count, 100);
                assert_eq!(*rate, 10.0);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn filtered_threshold_adds_a_decorated_entry() {
        let reg = seeded_registry();
        let spec = match ThresholdSpec::new("checks{endpoint:getPost}", vec!["rate>0.99".into()]) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        let summary = build_run_summary(&reg, &outcome(10), &[spec]);

        // Bare metric merges everything; decorated entry is filter-only.
        match &summary.metrics["checks"].values {
            MetricValues::Rate { passes, fails, .. } => {
                assert_eq!((*passes, *fails), (19, 1));
            }
            other => panic!("unexpected values: {other:?}"),
        }
        match &summary.metrics["checks{endpoint:getPost}"].values {
            MetricValues::Rate { rate, passes, fails } => {
                assert_eq!((*passes, *fails), (9, 1));
                assert_eq!(*rate, 0.9);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn summary_round_trips_through_json() {
        let reg = seeded_registry();
        let summary = build_run_summary(&reg, &outcome(10), &[]);

        let json = match serde_json::to_string(&summary) {
            Ok(j) => j,
            Err(e) => panic!("{e}"),
        };
        assert!(json.contains("\"p(95)\""));

        let back: RunSummary = match serde_json::from_str(&json) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(back.state.workers_spawned, 2);
        match &back.metrics["http_req_duration"].values {
            MetricValues::Trend { p95, count, .. } => {
                assert_eq!(*p95, Some(480.0));
                assert_eq!(*count, 5);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn empty_run_divides_by_zero_safely() {
        let reg = Registry::default();
        reg.register("http_reqs", MetricKind::Counter);
        let summary = build_run_summary(&reg, &RunOutcome::default(), &[]);
        match &summary.metrics["http_reqs"].values {
            MetricValues::Counter { count, rate } => {
                assert_eq!(*count, 0);
                assert_eq!(*rate, 0.0);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }
}
