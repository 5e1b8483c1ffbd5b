//! Argument parsing and command dispatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Instrument;
use uuid::Uuid;

use crate::commands::{apply, preview, scan, strategies};
use crate::context::{RunContext, load_profile_arg};
use crate::error::CliResult;

/// Parses CLI arguments, executes the requested command and returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let run_id = Uuid::new_v4().to_string();

    match dispatch(cli, &run_id).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn dispatch(cli: Cli, run_id: &str) -> CliResult<()> {
    let global = cli.global;
    let command = command_label(&cli.command);
    match cli.command {
        Command::Strategies(args) => {
            let profile = match &global.profile {
                Some(path) => Some(load_profile_arg(path)?),
                None => None,
            };
            strategies::handle_strategies(profile.as_ref(), &args, global.output)
        }
        Command::Scan(args) => {
            let ctx = RunContext::prepare(&global, run_id, command)?;
            scan::handle_scan(&ctx, &args, global.output)
                .instrument(ctx.span.clone())
                .await
        }
        Command::Preview(args) => {
            let ctx = RunContext::prepare(&global, run_id, command)?;
            preview::handle_preview(&ctx, &args, global.output)
                .instrument(ctx.span.clone())
                .await
        }
        Command::Apply(args) => {
            let ctx = RunContext::prepare(&global, run_id, command)?;
            apply::handle_apply(&ctx, &args, global.output)
                .instrument(ctx.span.clone())
                .await
        }
    }
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Scan(_) => "scan",
        Command::Preview(_) => "preview",
        Command::Apply(_) => "apply",
        Command::Strategies(_) => "strategies",
    }
}

#[derive(Parser)]
#[command(
    name = "reshelve",
    about = "Scan, preview and apply batch transformations to file trees"
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) global: GlobalArgs,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Clone, Debug)]
pub(crate) struct GlobalArgs {
    /// YAML profile describing roots, limits and the strategy chain.
    #[arg(long, global = true, env = "RESHELVE_PROFILE")]
    pub(crate) profile: Option<PathBuf>,
    /// Replace the profile's roots.
    #[arg(long = "root", global = true)]
    pub(crate) roots: Vec<PathBuf>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Select output format for commands that render structured data"
    )]
    pub(crate) output: OutputFormat,
    /// Log level used when `RUST_LOG` is unset; overrides the profile.
    #[arg(long, global = true, env = "RESHELVE_LOG_LEVEL")]
    pub(crate) log_level: Option<String>,
    /// Suppress progress lines on stderr.
    #[arg(long, global = true)]
    pub(crate) quiet: bool,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Walk the roots and list what the pipeline would see.
    Scan(ScanArgs),
    /// Analyse the pipeline and print the resulting tree without touching disk.
    Preview(PreviewArgs),
    /// Analyse the pipeline and apply the changes.
    Apply(ApplyArgs),
    /// List built-in strategies, or the profile's chain as flat properties.
    Strategies(StrategiesArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ScanArgs {
    /// Print every entry instead of per-root totals.
    #[arg(long)]
    pub(crate) entries: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct PreviewArgs {
    /// Include records no strategy changed.
    #[arg(long)]
    pub(crate) all: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ApplyArgs {
    /// Print the preview tree before applying.
    #[arg(long)]
    pub(crate) show_preview: bool,
    /// Worker threads per root; overrides the profile.
    #[arg(long)]
    pub(crate) workers: Option<usize>,
    /// Print the Prometheus metrics gathered during the run.
    #[arg(long)]
    pub(crate) metrics: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct StrategiesArgs {
    /// Print the profile's chain in the flat `pipeline.<n>.*` layout.
    #[arg(long)]
    pub(crate) properties: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}
