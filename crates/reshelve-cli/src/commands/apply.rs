use anyhow::anyhow;
use tracing::{info, warn};

use crate::cli::{ApplyArgs, OutputFormat};
use crate::commands::preview::build_tree;
use crate::context::RunContext;
use crate::error::{CliError, CliResult};
use crate::output::{render_json, render_preview, render_summary};

pub(crate) async fn handle_apply(
    ctx: &RunContext,
    args: &ApplyArgs,
    format: OutputFormat,
) -> CliResult<()> {
    if args.workers == Some(0) {
        return Err(CliError::validation("--workers must be at least 1"));
    }

    let (outcome, strategies) = ctx
        .run_blocking(|session| {
            let (records, _) = session.scan()?;
            let strategies = session.strategies();
            let outcome = session.analyze(records, &strategies);
            Ok((outcome, strategies))
        })
        .await?;

    if args.show_preview {
        let tree = build_tree(ctx, &outcome, true);
        render_preview(&outcome, &tree, format)?;
    }
    if outcome.cancelled {
        warn!("analysis cancelled; nothing applied");
        return Err(CliError::failure(anyhow!("analysis was cancelled")));
    }

    let workers = args.workers;
    let records = outcome.records;
    let summary = ctx
        .run_blocking(move |mut session| {
            if workers.is_some() {
                session.profile.execution.workers_per_root = workers;
            }
            Ok(session.execute(records, &strategies))
        })
        .await?;
    render_summary(&summary, format)?;

    if args.metrics {
        match &ctx.metrics {
            Some(metrics) => match format {
                OutputFormat::Table => {
                    let text = metrics.render().map_err(|err| {
                        CliError::failure(anyhow!("failed to render metrics: {err}"))
                    })?;
                    print!("{text}");
                }
                OutputFormat::Json => render_json(&metrics.snapshot())?,
            },
            None => warn!("metrics were requested but the registry is unavailable"),
        }
    }

    info!(
        success = summary.success,
        failed = summary.failed,
        skipped = summary.skipped,
        "apply finished"
    );
    if summary.failed > 0 {
        return Err(CliError::failure(anyhow!(
            "{} of {} records failed",
            summary.failed,
            summary.records.len()
        )));
    }
    if summary.cancelled {
        return Err(CliError::failure(anyhow!("execution was cancelled")));
    }
    Ok(())
}
