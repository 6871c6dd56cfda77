use std::time::Duration;

use hammr_core::{
    Check, Flow, FlowGroup, HttpCall, ScenarioExecutor, ScenarioProfile, Stage, ThinkTime,
    ThresholdSpec,
};

use crate::cli::RunArgs;

/// The smoke profile drains fast; long grace windows only delay reporting.
const SMOKE_GRACEFUL_STOP: Duration = Duration::from_secs(5);

/// Built-in flow against the posts API: list the collection, then fetch one
/// random post, with shape checks on both.
pub fn build_flow(args: &RunArgs) -> Flow {
    let base = args.base_url.trim_end_matches('/');

    let list = HttpCall::get(format!("{base}/posts"))
        .with_timeout(args.request_timeout)
        .with_tag("endpoint", "listPosts")
        .with_latency_trend("list_posts_duration")
        .with_check(Check::status_is("status is 200", 200))
        .with_check(Check::new("response is a non-empty array", |res| {
            res.json_value()
                .and_then(|v| v.as_array().map(|a| !a.is_empty()))
                .unwrap_or(false)
        }));

    let single = HttpCall::get(format!("{base}/posts/{{id}}"))
        .with_timeout(args.request_timeout)
        .with_random_id(args.max_id)
        .with_tag("endpoint", "getPost")
        .with_latency_trend("get_post_duration")
        .with_check(Check::status_is("status is 200", 200))
        .with_check(Check::new("post has an id", |res| {
            res.json_value()
                .map(|v| v.get("id").is_some())
                .unwrap_or(false)
        }));

    Flow::new(vec![
        FlowGroup::new("list posts", vec![list]),
        FlowGroup::new("get single post", vec![single]),
    ])
    .with_group_outcome_metrics("ok_rate", "errors")
}

pub fn build_profiles(args: &RunArgs) -> Vec<ScenarioProfile> {
    let think_time = if args.think_time.is_zero() {
        ThinkTime::None
    } else {
        ThinkTime::Fixed(args.think_time)
    };

    let mut profiles = Vec::new();

    if !args.no_smoke {
        profiles.push(ScenarioProfile {
            name: "smoke".to_string(),
            executor: ScenarioExecutor::FixedCount {
                vus: args.smoke_vus,
                duration: args.smoke_duration,
            },
            start_offset: Duration::ZERO,
            graceful_stop: SMOKE_GRACEFUL_STOP,
            tags: Vec::new(),
            think_time,
        });
    }

    if !args.no_load {
        let stages = if args.load_stages.is_empty() {
            default_load_stages(args.load_vus)
        } else {
            args.load_stages.clone()
        };

        profiles.push(ScenarioProfile {
            name: "load".to_string(),
            executor: ScenarioExecutor::RampingCount { start: 0, stages },
            start_offset: args.load_start,
            graceful_stop: args.graceful_stop,
            tags: Vec::new(),
            think_time,
        });
    }

    profiles
}

/// 30s ramp up, 1m hold, 30s ramp down.
fn default_load_stages(peak: u64) -> Vec<Stage> {
    vec![
        Stage {
            duration: Duration::from_secs(30),
            target: peak,
        },
        Stage {
            duration: Duration::from_secs(60),
            target: peak,
        },
        Stage {
            duration: Duration::from_secs(30),
            target: 0,
        },
    ]
}

pub fn build_thresholds(args: &RunArgs) -> Result<Vec<ThresholdSpec>, String> {
    let mut specs = vec![
        ThresholdSpec::new(
            "http_req_failed",
            vec![format!("rate<{}", args.max_failed_rate)],
        )?,
        ThresholdSpec::new("http_req_duration", vec![format!("p(95)<{}", args.p95_ms)])?,
        ThresholdSpec::new("checks", vec![format!("rate>{}", args.check_rate_floor)])?,
    ];

    for raw in &args.thresholds {
        let (source, exprs) = raw.split_once('=').ok_or_else(|| {
            format!("invalid --threshold (expected SOURCE=EXPR[,EXPR]): {raw}")
        })?;
        let expressions: Vec<String> = exprs
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if expressions.is_empty() {
            return Err(format!("--threshold has no expressions: {raw}"));
        }
        specs.push(ThresholdSpec::new(source, expressions)?);
    }

    Ok(specs)
}
