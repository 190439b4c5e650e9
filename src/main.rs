mod cli;
mod commands;
mod config;
mod downloader;
mod error;
mod progress;
mod response;
mod signals;
mod state;
mod transport;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::commands::{DownloadRequest, RunOutcome, EXIT_FAILURE, EXIT_OK};
use crate::signals::Interrupt;
use crate::transport::HttpTransport;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { EXIT_FAILURE } else { EXIT_OK });
        }
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting resumer");

    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Error: {:#}", e);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let config = args.config();
    let state_path = match &args.state {
        Some(path) => path.clone(),
        None => crate::utils::default_state_path(&args.url)?,
    };
    let request = DownloadRequest {
        url: args.url.clone(),
        output: args.output.clone(),
        output_dir: PathBuf::from("."),
        state_path,
    };

    let rt = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    rt.block_on(async {
        let transport = HttpTransport::new(&config)?;
        let interrupt = Interrupt::install(CancellationToken::new())
            .context("Failed to register signal handlers")?;

        let quiet = args.quiet;
        let outcome = crate::commands::run_download(
            &transport,
            request,
            &config,
            |state| {
                let name = state
                    .output_path()
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                crate::progress::transfer_bar(&name, quiet)
            },
            interrupt.token().clone(),
        )
        .await?;

        match &outcome {
            RunOutcome::Paused { .. } => {
                tracing::info!("Download state saved, run the same command again to resume")
            }
            RunOutcome::Failed(e) if e.is_timeout() => {
                tracing::error!("Download timed out, run the same command again to resume")
            }
            RunOutcome::Failed(e) => tracing::error!("Download failed: {}", e),
            RunOutcome::Completed { .. } | RunOutcome::AlreadyComplete => {}
        }
        Ok(outcome.exit_code(interrupt.signal()))
    })
}
