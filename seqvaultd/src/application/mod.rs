pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use clap::Parser;
use seqvault_core::error::Result;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch {
            staging,
            dest,
            store,
            max_workers,
            limits,
        } => {
            let errors =
                handlers::handle_watch(staging, dest, store, max_workers, limits.to_limits())?;
            if errors > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Publish {
            run_dir,
            dest,
            store,
            run_id,
            limits,
        } => {
            let report =
                handlers::handle_publish(run_dir, dest, store, run_id, limits.to_limits())?;
            eprintln!(
                "published {} of {} files, {} errors, {} containers",
                report.files_published,
                report.files_seen,
                report.files_errored,
                report.containers_closed
            );
            if report.files_errored > 0 {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Manifest { path } => handlers::handle_manifest(path),
    }
}
