//! wardenctl - operator CLI for the warden control plane
//!
//! One-shot commands (`instances`, `kill`, `observe`, `note`, `reconcile`,
//! `migrate`, `status`) and the long-running `watch` loop.

use std::process::ExitCode;

use clap::Parser;

mod budget;
mod commands;
mod error;
mod logging;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            error::print_error(&e);
            error::exit_code(&e)
        }
    }
}
