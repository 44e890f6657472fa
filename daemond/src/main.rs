//! daemond — directory-driven process supervisor
//!
//! Responsibilities:
//! - Start every program found in ./exec and restart it when it exits
//! - Deliver signals requested on each service's FIFO
//! - Reap zombie processes, including orphans when running as PID 1
//! - On SIGINT/SIGTERM, stop supervising and optionally exec a successor

use anyhow::{Context, Result};
use daemond::cli::Args;
use daemond::{logging, Config, Supervisor};
use tracing::{error, info};

/// Exit status when startup fails
const SETUP_EXIT: i32 = 1;
/// Exit status when the successor program cannot be executed
const SUCCESSOR_EXIT: i32 = 127;

fn main() {
    let args = Args::parse_or_exit();
    let mut supervisor = match start(args) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("daemond: {e:#}");
            std::process::exit(SETUP_EXIT);
        }
    };

    let iterations = supervisor.run();
    info!("supervisor loop exited after {iterations} iterations");

    if let Err(e) = supervisor.exec_successor() {
        error!("{e:#}");
        std::process::exit(SUCCESSOR_EXIT);
    }
}

fn start(args: Args) -> Result<Supervisor> {
    logging::init()?;

    let root = std::env::current_dir().context("Failed to resolve working directory")?;
    let config = Config::from_args(args, root);
    info!(
        "daemond v{} supervising {} (timeout: {:?})",
        env!("CARGO_PKG_VERSION"),
        config.layout.source_dir().display(),
        config.timeout
    );

    let mut supervisor = Supervisor::new(config);
    supervisor
        .install_signals()
        .context("Failed to set up signal handling")?;
    Ok(supervisor)
}
