use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use hammr_core::Stage;

pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration cannot be empty (expected e.g. 10s, 250ms, 1m)".to_string());
    }

    let number_end = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(s.len(), |(idx, _)| idx);

    if number_end == 0 {
        return Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        ));
    }

    let (number_str, unit_str) = s.split_at(number_end);
    let value: u64 = number_str
        .parse()
        .map_err(|_| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"))?;

    let unit = unit_str.trim();
    match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "ms" | "msec" | "msecs" | "millisecond" | "milliseconds" => {
            Ok(Duration::from_millis(value))
        }
        "m" | "min" | "mins" | "minute" | "minutes" => {
            let secs = value
                .checked_mul(60)
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        "h" | "hr" | "hrs" | "hour" | "hours" => {
            let secs = value
                .checked_mul(60)
                .and_then(|v| v.checked_mul(60))
                .ok_or_else(|| format!("duration '{s}' is too large"))?;
            Ok(Duration::from_secs(secs))
        }
        _ => Err(format!(
            "invalid duration '{s}' (expected e.g. 10s, 250ms, 1m)"
        )),
    }
}

/// Parse a ramp stage given as `DURATION:TARGET`, e.g. `30s:10`.
pub fn parse_stage(input: &str) -> Result<Stage, String> {
    let s = input.trim();
    let (dur, target) = s
        .split_once(':')
        .ok_or_else(|| format!("invalid stage '{s}' (expected DURATION:TARGET, e.g. 30s:10)"))?;

    let duration = parse_duration(dur)?;
    let target: u64 = target
        .trim()
        .parse()
        .map_err(|_| format!("invalid stage target in '{s}' (expected an integer)"))?;

    Ok(Stage { duration, target })
}

#[derive(Debug, Parser)]
#[command(
    name = "hammr",
    author,
    version,
    about = "HTTP load generator with built-in checks, thresholds, and reports",
    after_help = "Examples:\n  hammr run\n  hammr run --base-url https://api.example.com --load-stage 1m:20 --load-stage 30s:0\n  hammr run --smoke-vus 5 --think-time 100ms\n  hammr analyze --summary reports/summary.json\n\nFlags marked with an env var can also be configured through the environment."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the load scenarios and write summary reports
    #[command(
        long_about = "Run the configured scenarios (a short smoke profile and a ramping load profile) against the target, evaluate thresholds, and write summary reports (json/html/txt) plus timestamped copies under the reports directory."
    )]
    Run(RunArgs),

    /// Derive analysis.md from a previously written summary JSON
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Base URL the flow's endpoints are resolved against
    #[arg(
        long,
        env = "BASE_URL",
        default_value = "https://jsonplaceholder.typicode.com"
    )]
    pub base_url: String,

    /// Workers for the smoke profile
    #[arg(long, env = "SMOKE_VUS", default_value_t = 2)]
    pub smoke_vus: u64,

    /// Duration of the smoke profile
    #[arg(long, env = "SMOKE_DURATION", value_parser = parse_duration, default_value = "30s")]
    pub smoke_duration: Duration,

    /// Skip the smoke profile
    #[arg(long)]
    pub no_smoke: bool,

    /// Peak workers for the default load ramp (ignored when --load-stage is given)
    #[arg(long, env = "LOAD_VUS", default_value_t = 10)]
    pub load_vus: u64,

    /// Ramp stage for the load profile, repeatable (DURATION:TARGET).
    /// Defaults to 30s up to --load-vus, 1m hold, 30s down to 0.
    #[arg(long = "load-stage", value_parser = parse_stage, value_name = "DUR:TARGET")]
    pub load_stages: Vec<Stage>,

    /// Delay before the load profile starts, relative to run start
    #[arg(long, env = "LOAD_START", value_parser = parse_duration, default_value = "0s")]
    pub load_start: Duration,

    /// Skip the load profile
    #[arg(long)]
    pub no_load: bool,

    /// Grace window for in-flight iterations once a profile window ends
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub graceful_stop: Duration,

    /// Worker pause between iterations
    #[arg(long, env = "SLEEP_MS", value_parser = parse_duration, default_value = "200ms")]
    pub think_time: Duration,

    /// Upper bound for the random id in `GET /posts/{id}`
    #[arg(long, env = "MAX_ID", default_value_t = 100)]
    pub max_id: u64,

    /// Per-request timeout
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub request_timeout: Duration,

    /// Threshold: maximum tolerated `http_req_failed` rate
    #[arg(long, default_value_t = 0.01)]
    pub max_failed_rate: f64,

    /// Threshold: p95 latency SLA in milliseconds
    #[arg(long, default_value_t = 800.0)]
    pub p95_ms: f64,

    /// Threshold: minimum `checks` pass-rate
    #[arg(long, default_value_t = 0.99)]
    pub check_rate_floor: f64,

    /// Extra threshold, repeatable (`SOURCE=EXPR[,EXPR]`),
    /// e.g. `checks{endpoint:getPost}=rate>0.99`
    #[arg(long = "threshold", value_name = "SOURCE=EXPR,..")]
    pub thresholds: Vec<String>,

    /// Directory reports are written to (created if missing)
    #[arg(long, env = "REPORTS_DIR", default_value = "reports")]
    pub reports_dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct AnalyzeArgs {
    /// Summary JSON to analyze (defaults to <reports-dir>/summary.json)
    #[arg(long, env = "SUMMARY")]
    pub summary: Option<PathBuf>,

    /// Directory analysis.md is written to
    #[arg(long, env = "REPORTS_DIR", default_value = "reports")]
    pub reports_dir: PathBuf,
}
