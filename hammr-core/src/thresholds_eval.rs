use hammr_metrics::{MetricId, MetricKind, Registry, percentile};

use crate::error::{Error, Result};
use crate::thresholds::{ThresholdAgg, ThresholdOp, ThresholdSpec, parse_threshold_expr};

/// Outcome of one threshold expression against the final metric state.
#[derive(Debug, Clone)]
pub struct ThresholdResult {
    /// The source the threshold was configured on, filter included.
    pub source: String,
    pub expression: String,
    /// Aggregated value the expression was compared against. `None` means the
    /// metric was never registered or the filter matched no samples; that is
    /// always a failure, never a silent pass.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Evaluate every configured threshold against the registry's final state.
/// Results come back in configuration order, passes included.
pub fn evaluate_thresholds(
    metrics: &Registry,
    specs: &[ThresholdSpec],
) -> Result<Vec<ThresholdResult>> {
    let mut out = Vec::new();

    for spec in specs {
        let source = spec.source();
        let looked_up = metrics.lookup(&spec.metric);

        let filter_pairs: Vec<(&str, &str)> = spec
            .filter
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let filter = metrics.resolve_tags(&filter_pairs);

        for expr_raw in &spec.expressions {
            let expr = parse_threshold_expr(expr_raw).map_err(|error| Error::InvalidThreshold {
                metric: source.clone(),
                error,
            })?;

            let observed = looked_up
                .and_then(|(id, kind)| observed_value(metrics, id, kind, &expr.agg, &filter));

            let passed = observed.is_some_and(|v| compare(v, expr.op, expr.value));
            out.push(ThresholdResult {
                source: source.clone(),
                expression: expr_raw.clone(),
                observed,
                passed,
            });
        }
    }

    Ok(out)
}

fn observed_value(
    metrics: &Registry,
    metric_id: MetricId,
    kind: MetricKind,
    agg: &ThresholdAgg,
    filter: &hammr_metrics::TagSet,
) -> Option<f64> {
    match agg {
        ThresholdAgg::Count => match kind {
            MetricKind::Counter => Some(metrics.fold_counter_sum(metric_id, filter) as f64),
            MetricKind::Rate => {
                let (total, _hits) = metrics.fold_rate(metric_id, filter);
                (total > 0).then_some(total as f64)
            }
            MetricKind::Trend => {
                let count = metrics.fold_trend_summary(metric_id, filter).count;
                (count > 0).then_some(count as f64)
            }
            MetricKind::Gauge => None,
        },

        ThresholdAgg::Rate => match kind {
            MetricKind::Rate => {
                let (total, hits) = metrics.fold_rate(metric_id, filter);
                (total > 0).then(|| hits as f64 / total as f64)
            }
            _ => None,
        },

        ThresholdAgg::Avg => match kind {
            MetricKind::Trend => metrics.fold_trend_summary(metric_id, filter).mean,
            _ => None,
        },

        ThresholdAgg::Min => match kind {
            MetricKind::Trend => metrics.fold_trend_summary(metric_id, filter).min,
            _ => None,
        },

        ThresholdAgg::Max => match kind {
            MetricKind::Trend => metrics.fold_trend_summary(metric_id, filter).max,
            MetricKind::Gauge => metrics.fold_gauge_max(metric_id, filter).map(|v| v as f64),
            _ => None,
        },

        ThresholdAgg::P(p) => match kind {
            MetricKind::Trend => {
                let mut values = metrics.fold_trend_values(metric_id, filter);
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                percentile(&values, f64::from(*p))
            }
            _ => None,
        },
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => observed == expected,
    }
}
