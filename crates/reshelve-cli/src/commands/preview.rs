use reshelve_engine::{AnalysisOutcome, PreviewTree};

use crate::cli::{OutputFormat, PreviewArgs};
use crate::context::RunContext;
use crate::error::CliResult;
use crate::output::render_preview;

pub(crate) async fn handle_preview(
    ctx: &RunContext,
    args: &PreviewArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let outcome = ctx
        .run_blocking(|session| {
            let (records, _) = session.scan()?;
            let strategies = session.strategies();
            Ok(session.analyze(records, &strategies))
        })
        .await?;
    let tree = build_tree(ctx, &outcome, !args.all);
    render_preview(&outcome, &tree, format)
}

pub(crate) fn build_tree(
    ctx: &RunContext,
    outcome: &AnalysisOutcome,
    changed_only: bool,
) -> PreviewTree {
    PreviewTree::build(
        outcome.records.iter(),
        &ctx.session.profile.roots,
        changed_only,
    )
}
