// quickworkers - run a guest script with thread-backed workers

use anyhow::Result;
use clap::Parser;
use quickworkers::js::cli::HostCommands;
use quickworkers::logging;

/// Embedded QuickJS host with Web-Worker-style threads
#[derive(Parser, Debug)]
#[command(name = "quickworkers", version, about)]
struct Cli {
    /// Log at debug level when RUST_LOG is not set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: HostCommands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    cli.command.run()
}
