use crate::cli::{OutputFormat, ScanArgs};
use crate::context::RunContext;
use crate::error::CliResult;
use crate::output::render_scan;

pub(crate) async fn handle_scan(
    ctx: &RunContext,
    args: &ScanArgs,
    format: OutputFormat,
) -> CliResult<()> {
    let (_, reports) = ctx.run_blocking(|session| session.scan()).await?;
    render_scan(&reports, args.entries, format)
}
