use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use human_panic::setup_panic;
use tracing::error;

use mediafetch::features::fetch::{FetchArgs, handle};
use mediafetch::shared::errors::FetchError;
use mediafetch::shared::lifecycle::ShutdownHooks;
use mediafetch::shared::logging::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    setup_panic!();
    let args = FetchArgs::parse();
    init_logging(args.verbose);

    let hooks = ShutdownHooks::new();
    let result = tokio::select! {
        result = handle(args, hooks.clone()) => result,
        _ = tokio::signal::ctrl_c() => Err(FetchError::Interrupted),
    };

    match result {
        Ok(path) => {
            hooks.succeeded().await;
            println!("{} {}", "Saved".green().bold(), path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            hooks.interrupted();
            error!(error = %err, "Download failed");
            eprintln!("{} {err}", "Error:".red().bold());
            if err.is_resumable() {
                eprintln!("{}", "Run the same command again to resume.".yellow());
            }
            ExitCode::from(err.exit_code())
        }
    }
}
