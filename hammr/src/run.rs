use chrono::Local;

use hammr_core::{
    MetricValues, RunContext, ThresholdResult, build_run_summary, evaluate_thresholds,
    run_profiles,
};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::flows;
use crate::report::{self, SummaryDoc};
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let profiles = flows::build_profiles(&args);
    if profiles.is_empty() {
        return Err(RunError::InvalidInput(anyhow::anyhow!(
            "nothing to run: both --no-smoke and --no-load are set"
        )));
    }

    let thresholds = flows::build_thresholds(&args)
        .map_err(|msg| RunError::InvalidInput(anyhow::anyhow!(msg)))?;
    let flow = flows::build_flow(&args);

    let ctx = RunContext::new();

    eprintln!(
        "target={} profiles={}",
        args.base_url,
        profiles
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );

    let outcome = run_profiles(&ctx, &profiles, &flow)
        .await
        .map_err(classify_run_error)?;

    let results = evaluate_thresholds(&ctx.metrics, &thresholds)
        .map_err(|e| RunError::InvalidInput(e.into()))?;
    print_threshold_failures(&results);

    let summary = build_run_summary(&ctx.metrics, &outcome, &thresholds);

    let now = Local::now();
    let doc = SummaryDoc::new(now.to_rfc3339(), summary, &results);

    print!("{}", report::render_text(&doc));

    let timestamp = now.format("%Y-%m-%dT%H%M%S").to_string();
    let written = report::write_reports(&args.reports_dir, &doc, &timestamp)
        .map_err(RunError::RuntimeError)?;
    report::write_analysis(&args.reports_dir, &doc).map_err(RunError::RuntimeError)?;
    eprintln!(
        "reports written to {} ({} files)",
        args.reports_dir.display(),
        written.len() + 1
    );

    let checks_failed = match doc.summary.metrics.get("checks").map(|m| &m.values) {
        Some(MetricValues::Rate { fails, .. }) => *fails > 0,
        _ => false,
    };
    let thresholds_failed = results.iter().any(|r| !r.passed);

    Ok(ExitCode::from_quality_gates(checks_failed, thresholds_failed))
}

fn classify_run_error(err: hammr_core::Error) -> RunError {
    match err {
        hammr_core::Error::InvalidVus
        | hammr_core::Error::InvalidDuration
        | hammr_core::Error::InvalidStages
        | hammr_core::Error::InvalidExecutor
        | hammr_core::Error::InvalidThreshold { .. } => {
            RunError::InvalidInput(anyhow::Error::new(err).context("invalid run configuration"))
        }
        other => RunError::RuntimeError(anyhow::Error::new(other).context("run failed")),
    }
}

fn print_threshold_failures(results: &[ThresholdResult]) {
    let failed: Vec<&ThresholdResult> = results.iter().filter(|r| !r.passed).collect();
    if failed.is_empty() {
        return;
    }

    eprintln!("thresholds_failed: {}", failed.len());
    for r in failed {
        match r.observed {
            Some(o) => eprintln!(
                "threshold_failed: metric={} expr={} observed={o}",
                r.source, r.expression
            ),
            None => eprintln!(
                "threshold_failed: metric={} expr={} observed=-",
                r.source, r.expression
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["hammr", "run"];
        argv.extend_from_slice(extra);
        let cli = match crate::cli::Cli::try_parse_from(argv) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        match cli.command {
            crate::cli::Command::Run(a) => a,
            crate::cli::Command::Analyze(_) => panic!("expected run"),
        }
    }

    #[tokio::test]
    async fn disabling_every_profile_is_invalid_input() {
        let err = match run(run_args(&["--no-smoke", "--no-load"])).await {
            Ok(code) => panic!("expected an error, got exit code {}", code.as_i32()),
            Err(e) => e,
        };
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
    }

    #[tokio::test]
    async fn bad_extra_threshold_is_invalid_input() {
        let err = match run(run_args(&["--threshold", "checks=banana>1"])).await {
            Ok(code) => panic!("expected an error, got exit code {}", code.as_i32()),
            Err(e) => e,
        };
        assert_eq!(err.exit_code(), ExitCode::InvalidInput);
    }
}
