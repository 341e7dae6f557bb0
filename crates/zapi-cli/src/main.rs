use clap::Parser;
use zapi_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging as early as possible; results go to stdout.
    let level = cli.loglevel.directive();
    if cli.log_file {
        if let Err(err) = logging::init_logging(level) {
            logging::init_logging_stderr(level);
            tracing::warn!("cannot open log file ({:#}), logging to stderr", err);
        }
    } else {
        logging::init_logging_stderr(level);
    }

    if let Err(err) = cli.run().await {
        eprintln!("zapi error: {:#}", err);
        std::process::exit(1);
    }
}
