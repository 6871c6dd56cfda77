use anyhow::Context as _;

use crate::cli::AnalyzeArgs;
use crate::report::{self, SummaryDoc};

/// Re-derive analysis.md from a previously written summary JSON, without
/// running anything.
pub async fn analyze(args: AnalyzeArgs) -> anyhow::Result<()> {
    let path = args
        .summary
        .unwrap_or_else(|| args.reports_dir.join("summary.json"));

    let raw = tokio::fs::read_to_string(&path).await.with_context(|| {
        format!(
            "failed to read summary: {} (generate one with `hammr run`)",
            path.display()
        )
    })?;

    let doc: SummaryDoc = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse summary json: {}", path.display()))?;

    let written = report::write_analysis(&args.reports_dir, &doc)?;
    eprintln!("analysis written to {}", written.display());
    Ok(())
}
