use crate::demo::{run_demo, run_ingest, DemoArgs, IngestArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use engage_ai::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Engagement Candidate Pipeline",
    about = "Run the engagement candidate scoring pipeline from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run an end-to-end pipeline demo against in-process fixtures
    Demo(DemoArgs),
    /// Ingest a connector batch export and process it through the pipeline
    Ingest(IngestArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Demo(args) => run_demo(args).await,
        Command::Ingest(args) => run_ingest(args).await,
    }
}
