use hammr_metrics::{MetricId, MetricKind, Registry};

/// Built-in per-iteration and concurrency metrics.
#[derive(Debug, Clone, Copy)]
pub struct IterationMetricIds {
    pub iterations: MetricId,
    /// Full iteration duration in milliseconds, think time included.
    pub iteration_duration: MetricId,
    /// Current active worker count (peak-tracked per scenario).
    pub vus: MetricId,
    /// Workers allocated across all scenarios.
    pub vus_max: MetricId,
}

#[derive(Debug, Clone, Copy)]
pub struct IterationSample<'a> {
    pub scenario: &'a str,
    pub success: bool,
    pub duration: std::time::Duration,
}

impl IterationMetricIds {
    pub fn register(metrics: &Registry) -> Self {
        Self {
            iterations: metrics.register("iterations", MetricKind::Counter),
            iteration_duration: metrics.register("iteration_duration", MetricKind::Trend),
            vus: metrics.register("vus", MetricKind::Gauge),
            vus_max: metrics.register("vus_max", MetricKind::Gauge),
        }
    }

    pub fn record_iteration(&self, metrics: &Registry, sample: IterationSample<'_>) {
        let status = if sample.success { "success" } else { "failure" };
        let tags = metrics.resolve_tags(&[("scenario", sample.scenario), ("status", status)]);

        if let Some(h) = metrics.handle(self.iterations, tags.clone()) {
            h.increment(1);
        }
        if let Some(h) = metrics.handle(self.iteration_duration, tags) {
            h.observe_trend(sample.duration.as_secs_f64() * 1_000.0);
        }
    }

    /// Bump the per-scenario active-worker gauge, keeping its peak.
    pub fn record_active_workers(&self, metrics: &Registry, scenario: &str, active: i64) {
        let tags = metrics.resolve_tags(&[("scenario", scenario)]);
        if let Some(h) = metrics.handle(self.vus, tags) {
            h.max_gauge(active);
        }
    }

    pub fn record_allocated_workers(&self, metrics: &Registry, scenario: &str, allocated: i64) {
        let tags = metrics.resolve_tags(&[("scenario", scenario)]);
        if let Some(h) = metrics.handle(self.vus_max, tags) {
            h.set_gauge(allocated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hammr_metrics::TagSet;
    use std::time::Duration;

    #[test]
    fn iterations_split_by_status() {
        let reg = Registry::default();
        let ids = IterationMetricIds::register(&reg);

        for _ in 0..3 {
            ids.record_iteration(
                &reg,
                IterationSample {
                    scenario: "smoke",
                    success: true,
                    duration: Duration::from_millis(250),
                },
            );
        }
        ids.record_iteration(
            &reg,
            IterationSample {
                scenario: "smoke",
                success: false,
                duration: Duration::from_millis(900),
            },
        );

        assert_eq!(reg.fold_counter_sum(ids.iterations, &TagSet::default()), 4);
        let failures = reg.resolve_tags(&[("status", "failure")]);
        assert_eq!(reg.fold_counter_sum(ids.iterations, &failures), 1);
    }

    #[test]
    fn active_worker_gauge_keeps_its_peak() {
        let reg = Registry::default();
        let ids = IterationMetricIds::register(&reg);

        ids.record_active_workers(&reg, "load", 4);
        ids.record_active_workers(&reg, "load", 10);
        ids.record_active_workers(&reg, "load", 2);

        assert_eq!(reg.fold_gauge_max(ids.vus, &TagSet::default()), Some(10));
    }
}
