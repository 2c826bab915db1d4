use crate::commands::{run_batch, run_lookup, BatchArgs, LookupArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use tract_income::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Tract Income Lookup",
    about = "Resolve US addresses to census tracts and classify tract income",
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
    /// Look up a single address
    Lookup(LookupArgs),
    /// Look up every address in a CSV file
    Batch(BatchArgs),
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
        Command::Lookup(args) => run_lookup(args).await,
        Command::Batch(args) => run_batch(args).await,
    }
}
