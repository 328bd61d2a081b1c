use clap::Parser;
use resub_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // File logging when the state directory is usable, stderr otherwise.
    if let Err(e) = logging::init_logging(cli.verbose) {
        logging::init_logging_stderr(cli.verbose);
        tracing::warn!("file logging unavailable: {:#}", e);
    }

    if let Err(err) = cli.run().await {
        eprintln!("resub error: {:#}", err);
        std::process::exit(1);
    }
}
