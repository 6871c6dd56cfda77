use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use hammr_core::{MetricValues, RunSummary, ThresholdResult};

/// The JSON artifact written after a run: the run summary plus threshold
/// outcomes, which `analyze` later re-reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryDoc {
    pub generated_at: String,
    #[serde(flatten)]
    pub summary: RunSummary,
    #[serde(default)]
    pub thresholds: Vec<ThresholdLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdLine {
    pub source: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

impl From<&ThresholdResult> for ThresholdLine {
    fn from(r: &ThresholdResult) -> Self {
        Self {
            source: r.source.clone(),
            expression: r.expression.clone(),
            observed: r.observed,
            passed: r.passed,
        }
    }
}

impl SummaryDoc {
    pub fn new(
        generated_at: String,
        summary: RunSummary,
        thresholds: &[ThresholdResult],
    ) -> Self {
        Self {
            generated_at,
            summary,
            thresholds: thresholds.iter().map(ThresholdLine::from).collect(),
        }
    }

    fn counter(&self, name: &str) -> (Option<u64>, Option<f64>) {
        match self.summary.metrics.get(name).map(|m| &m.values) {
            Some(MetricValues::Counter { count, rate }) => (Some(*count), Some(*rate)),
            _ => (None, None),
        }
    }

    fn rate(&self, name: &str) -> Option<(f64, u64, u64)> {
        match self.summary.metrics.get(name).map(|m| &m.values) {
            Some(MetricValues::Rate {
                rate,
                passes,
                fails,
            }) => Some((*rate, *passes, *fails)),
            _ => None,
        }
    }

    fn gauge(&self, name: &str) -> Option<i64> {
        match self.summary.metrics.get(name).map(|m| &m.values) {
            Some(MetricValues::Gauge { value }) => Some(*value),
            _ => None,
        }
    }

    fn trend(&self, name: &str) -> Option<&MetricValues> {
        match self.summary.metrics.get(name).map(|m| &m.values) {
            Some(v @ MetricValues::Trend { .. }) => Some(v),
            _ => None,
        }
    }

    /// Alert lines derived from the final state: raw failures, failed
    /// thresholds, and truncation.
    pub fn alerts(&self) -> Vec<String> {
        let mut out = Vec::new();

        if let Some((rate, _passes, fails)) = self.rate("http_req_failed")
            && fails > 0
        {
            out.push(format!(
                "{fails} failed requests ({})",
                fmt_pct(Some(rate))
            ));
        }

        for t in self.thresholds.iter().filter(|t| !t.passed) {
            out.push(format!(
                "threshold failed: {} {} (observed {})",
                t.source,
                t.expression,
                fmt_observed(t.observed)
            ));
        }

        if self.summary.state.truncated {
            out.push(format!(
                "run truncated: {} workers cancelled after the graceful-stop window",
                self.summary.state.workers_cancelled
            ));
        }

        out
    }
}

pub fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.2}%", v * 100.0),
        None => "-".to_string(),
    }
}

pub fn fmt_ms(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}ms"),
        None => "-".to_string(),
    }
}

pub fn fmt_observed(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "-".to_string(),
    }
}

fn trend_avg_p95(values: Option<&MetricValues>) -> (Option<f64>, Option<f64>) {
    match values {
        Some(MetricValues::Trend { avg, p95, .. }) => (*avg, *p95),
        _ => (None, None),
    }
}

pub fn render_json(doc: &SummaryDoc) -> anyhow::Result<String> {
    serde_json::to_string_pretty(doc).context("serialize summary json")
}

/// Minimal HTML wrapper around the pretty JSON.
pub fn render_html(doc: &SummaryDoc) -> anyhow::Result<String> {
    let json = render_json(doc)?;
    let escaped = json
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    Ok(format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>hammr summary</title>\n</head>\n<body>\n<h1>hammr summary</h1>\n<p>generated at {}</p>\n<pre>{}</pre>\n</body>\n</html>\n",
        doc.generated_at, escaped
    ))
}

pub fn render_text(doc: &SummaryDoc) -> String {
    let mut out = String::new();

    let (iterations, _) = doc.counter("iterations");
    let (reqs, req_rate) = doc.counter("http_reqs");
    let checks = doc.rate("checks");
    let failed = doc.rate("http_req_failed");
    let (avg, p95) = trend_avg_p95(doc.trend("http_req_duration"));
    let peak_workers = doc.gauge("vus");

    out.push_str("hammr run summary\n");
    out.push_str(&format!("generated at {}\n", doc.generated_at));
    out.push_str(&format!(
        "duration {:.1}s, workers {} (cancelled {})\n\n",
        doc.summary.state.test_run_duration_ms / 1_000.0,
        doc.summary.state.workers_spawned,
        doc.summary.state.workers_cancelled,
    ));

    out.push_str(&format!(
        "  iterations ........ {}\n",
        iterations.map_or_else(|| "-".to_string(), |v| v.to_string())
    ));
    out.push_str(&format!(
        "  requests .......... {} ({}/s)\n",
        reqs.map_or_else(|| "-".to_string(), |v| v.to_string()),
        req_rate.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
    ));
    out.push_str(&format!(
        "  checks ............ {}{}\n",
        fmt_pct(checks.map(|(r, _, _)| r)),
        checks.map_or_else(String::new, |(_, p, f)| format!(" ({p}/{})", p + f))
    ));
    out.push_str(&format!(
        "  failed requests ... {}\n",
        fmt_pct(failed.map(|(r, _, _)| r))
    ));
    out.push_str(&format!("  latency avg ....... {}\n", fmt_ms(avg)));
    out.push_str(&format!("  latency p95 ....... {}\n", fmt_ms(p95)));
    out.push_str(&format!(
        "  peak workers ...... {}\n",
        peak_workers.map_or_else(|| "-".to_string(), |v| v.to_string())
    ));

    out.push_str("\nthresholds\n");
    if doc.thresholds.is_empty() {
        out.push_str("  (none configured)\n");
    }
    for t in &doc.thresholds {
        out.push_str(&format!(
            "  {} {} {} (observed {})\n",
            if t.passed { "PASS" } else { "FAIL" },
            t.source,
            t.expression,
            fmt_observed(t.observed)
        ));
    }

    out.push_str("\nalerts\n");
    let alerts = doc.alerts();
    if alerts.is_empty() {
        out.push_str("  none\n");
    }
    for a in alerts {
        out.push_str(&format!("  {a}\n"));
    }

    out
}

/// Markdown rendering of the same sections, used for analysis.md.
pub fn render_markdown(doc: &SummaryDoc) -> String {
    let mut out = String::new();

    let (iterations, _) = doc.counter("iterations");
    let (reqs, req_rate) = doc.counter("http_reqs");
    let checks = doc.rate("checks");
    let failed = doc.rate("http_req_failed");
    let (avg, p95) = trend_avg_p95(doc.trend("http_req_duration"));
    let peak_workers = doc.gauge("vus");

    out.push_str("# Run analysis\n\n");
    out.push_str(&format!("Generated at {}.\n\n", doc.generated_at));

    out.push_str("## Numeric summary\n\n");
    out.push_str("| metric | value |\n|---|---|\n");
    out.push_str(&format!(
        "| duration | {:.1}s |\n",
        doc.summary.state.test_run_duration_ms / 1_000.0
    ));
    out.push_str(&format!(
        "| iterations | {} |\n",
        iterations.map_or_else(|| "-".to_string(), |v| v.to_string())
    ));
    out.push_str(&format!(
        "| requests | {} ({}/s) |\n",
        reqs.map_or_else(|| "-".to_string(), |v| v.to_string()),
        req_rate.map_or_else(|| "-".to_string(), |v| format!("{v:.1}"))
    ));
    out.push_str(&format!(
        "| checks | {} |\n",
        fmt_pct(checks.map(|(r, _, _)| r))
    ));
    out.push_str(&format!(
        "| failed requests | {} |\n",
        fmt_pct(failed.map(|(r, _, _)| r))
    ));
    out.push_str(&format!("| latency avg | {} |\n", fmt_ms(avg)));
    out.push_str(&format!("| latency p95 | {} |\n", fmt_ms(p95)));
    out.push_str(&format!(
        "| peak workers | {} |\n",
        peak_workers.map_or_else(|| "-".to_string(), |v| v.to_string())
    ));

    out.push_str("\n## Thresholds\n\n");
    if doc.thresholds.is_empty() {
        out.push_str("None configured.\n");
    } else {
        out.push_str("| result | source | expression | observed |\n|---|---|---|---|\n");
        for t in &doc.thresholds {
            out.push_str(&format!(
                "| {} | `{}` | `{}` | {} |\n",
                if t.passed { "PASS" } else { "FAIL" },
                t.source,
                t.expression,
                fmt_observed(t.observed)
            ));
        }
    }

    out.push_str("\n## Alerts\n\n");
    let alerts = doc.alerts();
    if alerts.is_empty() {
        out.push_str("None.\n");
    }
    for a in alerts {
        out.push_str(&format!("- {a}\n"));
    }

    out
}

/// Write `summary.{json,html,txt}` plus timestamped history copies
/// (`summary_<YYYY-MM-DDTHHMMSS>.*`) under `dir`, creating it as needed.
pub fn write_reports(
    dir: &Path,
    doc: &SummaryDoc,
    timestamp: &str,
) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create reports dir: {}", dir.display()))?;

    let json = render_json(doc)?;
    let html = render_html(doc)?;
    let text = render_text(doc);

    let mut written = Vec::new();
    for (stem, ext, content) in [
        ("summary", "json", &json),
        ("summary", "html", &html),
        ("summary", "txt", &text),
    ] {
        for name in [
            format!("{stem}.{ext}"),
            format!("{stem}_{timestamp}.{ext}"),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, content)
                .with_context(|| format!("failed to write report: {}", path.display()))?;
            written.push(path);
        }
    }

    Ok(written)
}

pub fn write_analysis(dir: &Path, doc: &SummaryDoc) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create reports dir: {}", dir.display()))?;

    let path = dir.join("analysis.md");
    std::fs::write(&path, render_markdown(doc))
        .with_context(|| format!("failed to write analysis: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hammr_core::{MetricReport, RunState};
    use std::collections::BTreeMap;

    fn doc_with(metrics: BTreeMap<String, MetricReport>, thresholds: Vec<ThresholdLine>) -> SummaryDoc {
        SummaryDoc {
            generated_at: "2026-08-31T12:00:00Z".to_string(),
            summary: RunSummary {
                state: RunState {
                    test_run_duration_ms: 120_000.0,
                    workers_spawned: 12,
                    workers_cancelled: 0,
                    truncated: false,
                },
                metrics,
            },
            thresholds,
        }
    }

    fn healthy_doc() -> SummaryDoc {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "http_reqs".to_string(),
            MetricReport {
                kind: "counter".to_string(),
                values: MetricValues::Counter {
                    count: 2400,
                    rate: 20.0,
                },
            },
        );
        metrics.insert(
            "checks".to_string(),
            MetricReport {
                kind: "rate".to_string(),
                values: MetricValues::Rate {
                    rate: 0.9996,
                    passes: 4798,
                    fails: 2,
                },
            },
        );
        metrics.insert(
            "http_req_duration".to_string(),
            MetricReport {
                kind: "trend".to_string(),
                values: MetricValues::Trend {
                    avg: Some(102.5),
                    min: Some(40.0),
                    med: Some(95.0),
                    max: Some(900.0),
                    p90: Some(200.0),
                    p95: Some(240.31),
                    p99: Some(600.0),
                    count: 2400,
                },
            },
        );
        doc_with(
            metrics,
            vec![ThresholdLine {
                source: "http_req_failed".to_string(),
                expression: "rate<0.01".to_string(),
                observed: Some(0.0),
                passed: true,
            }],
        )
    }

    #[test]
    fn text_report_formats_known_metrics() {
        let text = render_text(&healthy_doc());
        assert!(text.contains("requests .......... 2400 (20.0/s)"));
        assert!(text.contains("checks ............ 99.96% (4798/4800)"));
        assert!(text.contains("latency p95 ....... 240.3ms"));
        assert!(text.contains("PASS http_req_failed rate<0.01"));
        assert!(text.contains("alerts\n  none"));
    }

    #[test]
    fn absent_metrics_render_placeholders_not_errors() {
        let doc = doc_with(
            BTreeMap::new(),
            vec![ThresholdLine {
                source: "checks".to_string(),
                expression: "rate>0.99".to_string(),
                observed: None,
                passed: false,
            }],
        );

        let text = render_text(&doc);
        assert!(text.contains("iterations ........ -"));
        assert!(text.contains("latency p95 ....... -"));
        assert!(text.contains("FAIL checks rate>0.99 (observed -)"));

        let md = render_markdown(&doc);
        assert!(md.contains("| latency p95 | - |"));
        assert!(md.contains("| FAIL | `checks` | `rate>0.99` | - |"));
    }

    #[test]
    fn alerts_derive_from_failures_and_thresholds() {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "http_req_failed".to_string(),
            MetricReport {
                kind: "rate".to_string(),
                values: MetricValues::Rate {
                    rate: 0.05,
                    passes: 5,
                    fails: 5,
                },
            },
        );
        let mut doc = doc_with(
            metrics,
            vec![ThresholdLine {
                source: "http_req_failed".to_string(),
                expression: "rate<0.01".to_string(),
                observed: Some(0.05),
                passed: false,
            }],
        );
        doc.summary.state.truncated = true;
        doc.summary.state.workers_cancelled = 3;

        let alerts = doc.alerts();
        assert_eq!(alerts.len(), 3);
        assert!(alerts[0].contains("5 failed requests"));
        assert!(alerts[1].contains("threshold failed: http_req_failed rate<0.01"));
        assert!(alerts[2].contains("3 workers cancelled"));
    }

    #[test]
    fn write_reports_creates_latest_and_history_files() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        let nested = dir.path().join("reports/nested");

        let written = match write_reports(&nested, &healthy_doc(), "2026-08-31T120000") {
            Ok(w) => w,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(written.len(), 6);
        assert!(nested.join("summary.json").is_file());
        assert!(nested.join("summary_2026-08-31T120000.html").is_file());
        assert!(nested.join("summary_2026-08-31T120000.txt").is_file());
    }

    #[test]
    fn summary_doc_round_trips_with_thresholds() {
        let doc = healthy_doc();
        let json = match render_json(&doc) {
            Ok(j) => j,
            Err(e) => panic!("{e}"),
        };
        let back: SummaryDoc = match serde_json::from_str(&json) {
            Ok(d) => d,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(back.thresholds.len(), 1);
        assert!(back.thresholds[0].passed);
        assert_eq!(back.summary.state.workers_spawned, 12);
    }

    #[test]
    fn html_escapes_embedded_json() {
        let html = match render_html(&healthy_doc()) {
            Ok(h) => h,
            Err(e) => panic!("{e}"),
        };
        assert!(html.starts_with("<!doctype html>"));
        assert!(html.contains("<pre>"));
        assert!(!html.contains("</pre></pre>"));
    }
}
