use hammr_metrics::{MetricId, MetricKind, Registry};

/// Built-in per-request metrics, registered once per run.
#[derive(Debug, Clone, Copy)]
pub struct RequestMetricIds {
    pub http_reqs: MetricId,
    /// Request latency in milliseconds (fractional).
    pub http_req_duration: MetricId,
    /// Rate of failed requests (transport error or failure status).
    pub http_req_failed: MetricId,
    pub data_received: MetricId,
    pub data_sent: MetricId,
    /// Aggregate pass-rate across all named checks.
    pub checks: MetricId,
}

#[derive(Debug, Clone, Copy)]
pub struct RequestSample<'a> {
    pub scenario: &'a str,
    pub group: &'a str,
    /// Whether the request counts as failed (transport error or non-success
    /// status).
    pub failed: bool,
    pub duration: std::time::Duration,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub error_kind: Option<&'a str>,
}

impl RequestMetricIds {
    pub fn register(metrics: &Registry) -> Self {
        Self {
            http_reqs: metrics.register("http_reqs", MetricKind::Counter),
            http_req_duration: metrics.register("http_req_duration", MetricKind::Trend),
            http_req_failed: metrics.register("http_req_failed", MetricKind::Rate),
            data_received: metrics.register("data_received", MetricKind::Counter),
            data_sent: metrics.register("data_sent", MetricKind::Counter),
            checks: metrics.register("checks", MetricKind::Rate),
        }
    }

    pub fn record_request(
        &self,
        metrics: &Registry,
        sample: RequestSample<'_>,
        extra_tags: &[(&str, &str)],
    ) {
        let filter_extra =
            |(k, _v): &(&str, &str)| !matches!(*k, "scenario" | "group" | "error_kind");

        let resolve = |base: &[(&str, &str)]| {
            if extra_tags.is_empty() {
                return metrics.resolve_tags(base);
            }

            let mut merged: Vec<(&str, &str)> = Vec::with_capacity(base.len() + extra_tags.len());
            merged.extend_from_slice(base);
            merged.extend(extra_tags.iter().copied().filter(filter_extra));
            metrics.resolve_tags(&merged)
        };

        let tags = resolve(&[("scenario", sample.scenario), ("group", sample.group)]);

        // Every request contributes exactly one failed-rate sample. The error
        // kind rides along as a tag on that sample, so per-kind breakdowns
        // come from filtering, never from extra samples.
        let failed_tags = match sample.error_kind {
            Some(kind) if sample.failed => resolve(&[
                ("scenario", sample.scenario),
                ("group", sample.group),
                ("error_kind", kind),
            ]),
            _ => tags.clone(),
        };

        if let Some(h) = metrics.handle(self.http_reqs, tags.clone()) {
            h.increment(1);
        }
        if let Some(h) = metrics.handle(self.data_received, tags.clone()) {
            h.increment(sample.bytes_received);
        }
        if let Some(h) = metrics.handle(self.data_sent, tags.clone()) {
            h.increment(sample.bytes_sent);
        }
        if let Some(h) = metrics.handle(self.http_req_failed, failed_tags) {
            h.add_rate(sample.failed);
        }

        let duration_ms = sample.duration.as_secs_f64() * 1_000.0;
        if let Some(h) = metrics.handle(self.http_req_duration, tags) {
            h.observe_trend(duration_ms);
        }
    }

    /// Record one check outcome. Each check emits into both the aggregate
    /// `checks` rate and a per-check series tagged with the check's name.
    pub fn record_check(
        &self,
        metrics: &Registry,
        scenario: &str,
        group: &str,
        check_name: &str,
        ok: bool,
        extra_tags: &[(&str, &str)],
    ) {
        let mut merged: Vec<(&str, &str)> = Vec::with_capacity(3 + extra_tags.len());
        merged.push(("scenario", scenario));
        merged.push(("group", group));
        merged.push(("check", check_name));
        merged.extend(
            extra_tags
                .iter()
                .copied()
                .filter(|(k, _)| !matches!(*k, "scenario" | "group" | "check")),
        );

        let tags = metrics.resolve_tags(&merged);
        if let Some(h) = metrics.handle(self.checks, tags) {
            h.add_rate(ok);
        }
    }
}
