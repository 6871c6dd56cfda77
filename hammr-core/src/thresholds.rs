//! Threshold expression and source parsing.
//!
//! A threshold attaches a list of expressions (`rate<0.01`, `p(95)<800`) to a
//! metric source. The source is either a bare metric name (`http_req_failed`)
//! or a name with a tag filter (`checks{endpoint:getPost}`), in which case
//! only series carrying all filter tags are aggregated.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl ThresholdOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Eq => "==",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    P(u32),
}

#[derive(Debug, Clone)]
pub struct ThresholdExpr {
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

/// One configured threshold: a metric source plus its expressions.
#[derive(Debug, Clone)]
pub struct ThresholdSpec {
    pub metric: String,
    /// Tag filter from the source's `{key:value, ...}` suffix.
    pub filter: Vec<(String, String)>,
    pub expressions: Vec<String>,
}

impl ThresholdSpec {
    pub fn new(source: &str, expressions: Vec<String>) -> Result<Self, String> {
        let (metric, filter) = parse_threshold_source(source)?;
        // Reject malformed expressions up front, before anything runs.
        for expr in &expressions {
            parse_threshold_expr(expr)?;
        }
        Ok(Self {
            metric,
            filter,
            expressions,
        })
    }

    /// The source string this spec was parsed from, reconstructed for
    /// reporting.
    pub fn source(&self) -> String {
        if self.filter.is_empty() {
            return self.metric.clone();
        }
        let tags: Vec<String> = self
            .filter
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect();
        format!("{}{{{}}}", self.metric, tags.join(","))
    }
}

/// Split a threshold source into metric name and tag filter.
pub fn parse_threshold_source(source: &str) -> Result<(String, Vec<(String, String)>), String> {
    let source = source.trim();
    if source.is_empty() {
        return Err("empty threshold source".to_string());
    }

    let Some(brace) = source.find('{') else {
        return Ok((source.to_string(), Vec::new()));
    };

    let Some(inner) = source[brace..].strip_prefix('{').and_then(|s| s.strip_suffix('}')) else {
        return Err(format!("unclosed tag filter in threshold source: {source}"));
    };

    let metric = source[..brace].trim();
    if metric.is_empty() {
        return Err(format!("missing metric name in threshold source: {source}"));
    }

    let mut filter = Vec::new();
    for pair in inner.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((k, v)) = pair.split_once(':') else {
            return Err(format!("invalid tag filter `{pair}` in threshold source: {source}"));
        };
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            return Err(format!("invalid tag filter `{pair}` in threshold source: {source}"));
        }
        filter.push((k.to_string(), v.to_string()));
    }

    Ok((metric.to_string(), filter))
}

pub fn parse_threshold_expr(raw: &str) -> Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    // Two-character operators first so `<=` doesn't parse as `<`.
    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: u32 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(1..=100).contains(&p) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr { agg, op, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_threshold_expr_trims_whitespace() {
        let expr = match parse_threshold_expr("  avg  <=  123  ") {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(expr.agg, ThresholdAgg::Avg);
        assert_eq!(expr.op, ThresholdOp::Lte);
        assert_eq!(expr.value, 123.0);
    }

    #[test]
    fn parse_threshold_expr_prefers_two_char_operators() {
        let expr = match parse_threshold_expr("p(95)<=800") {
            Ok(e) => e,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(expr.agg, ThresholdAgg::P(95));
        assert_eq!(expr.op, ThresholdOp::Lte);
    }

    #[test]
    fn parse_threshold_expr_rejects_out_of_range_percentiles() {
        let err = match parse_threshold_expr("p(101)<1") {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(err.contains("out of range"));
        assert!(parse_threshold_expr("p(0)<1").is_err());
        assert!(parse_threshold_expr("p(100)<1").is_ok());
    }

    #[test]
    fn parse_threshold_expr_rejects_unknown_aggregations() {
        assert!(parse_threshold_expr("median<5").is_err());
        assert!(parse_threshold_expr("rate<abc").is_err());
    }

    #[test]
    fn source_without_filter_is_just_the_name() {
        let (metric, filter) = match parse_threshold_source("http_req_failed") {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(metric, "http_req_failed");
        assert!(filter.is_empty());
    }

    #[test]
    fn source_filter_parses_pairs() {
        let (metric, filter) = match parse_threshold_source("checks{endpoint:getPost, group:g1}") {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(metric, "checks");
        assert_eq!(
            filter,
            vec![
                ("endpoint".to_string(), "getPost".to_string()),
                ("group".to_string(), "g1".to_string()),
            ]
        );
    }

    #[test]
    fn source_rejects_malformed_filters() {
        assert!(parse_threshold_source("checks{endpoint:getPost").is_err());
        assert!(parse_threshold_source("checks{endpoint}").is_err());
        assert!(parse_threshold_source("{endpoint:getPost}").is_err());
        assert!(parse_threshold_source("").is_err());
    }

    #[test]
    fn spec_rejects_malformed_expressions_up_front() {
        assert!(ThresholdSpec::new("checks", vec!["banana>1".into()]).is_err());
        assert!(ThresholdSpec::new("checks", vec!["rate>0.99".into(), "p(0)<1".into()]).is_err());
    }

    #[test]
    fn spec_source_round_trips() {
        let spec = match ThresholdSpec::new("checks{endpoint:getPost}", vec!["rate>0.99".into()]) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        };
        assert_eq!(spec.source(), "checks{endpoint:getPost}");
    }
}
