use anyhow::{Context, Result};
use indicatif::HumanBytes;
use std::path::PathBuf;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::DownloadConfig;
use crate::downloader::{describe, AttemptStatus, TransferEngine};
use crate::error::{StateError, TransferError};
use crate::progress::ProgressObserver;
use crate::state::{StateStore, TransferState};
use crate::transport::Transport;
use crate::utils::{filename_from_url, get_filename_from_url, get_unique_filepath};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// One invocation: what to fetch and where its state lives.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Explicit output file. When absent a name is discovered.
    pub output: Option<PathBuf>,
    /// Directory that receives a discovered output file.
    pub output_dir: PathBuf,
    pub state_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Fresh,
    Resuming,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed { bytes_written: u64 },
    /// The loaded state already covers the whole resource. No request was made.
    AlreadyComplete,
    /// Cancelled at a chunk boundary; state was saved.
    Paused { bytes_written: u64 },
    Failed(TransferError),
}

impl RunOutcome {
    /// Process exit status for this outcome.
    ///
    /// A pause exits with the number of the signal that caused it, so a
    /// supervisor can tell "paused" from "finished" (0) and "failed" (1).
    pub fn exit_code(&self, signal: Option<i32>) -> i32 {
        match self {
            RunOutcome::Completed { .. } | RunOutcome::AlreadyComplete => EXIT_OK,
            RunOutcome::Paused { .. } => signal.unwrap_or(EXIT_FAILURE),
            RunOutcome::Failed(_) => EXIT_FAILURE,
        }
    }
}

/// Loads the state for `request`, or starts fresh when there is none or it
/// cannot be trusted.
pub async fn prepare_state<T: Transport>(
    transport: &T,
    store: &StateStore,
    request: &DownloadRequest,
) -> Result<(TransferState, StartMode)> {
    match store.load().await {
        Ok(mut state) => {
            if state.url() != request.url {
                warn!(
                    state_url = state.url(),
                    requested_url = %request.url,
                    "state file belongs to a different URL, continuing with the state's URL"
                );
            }
            if let Some(output) = &request.output {
                if output != state.output_path() {
                    warn!(
                        state_output = %state.output_path().display(),
                        requested_output = %output.display(),
                        "state file names a different output, continuing with the state's output"
                    );
                }
            }

            match check_output(&state).await {
                Ok(()) => Ok((state, StartMode::Resuming)),
                Err(reason) => {
                    warn!(
                        output = %state.output_path().display(),
                        resume_offset = state.resume_offset(),
                        "{}, restarting from byte 0",
                        reason
                    );
                    state.restart();
                    Ok((state, StartMode::Fresh))
                }
            }
        }
        Err(StateError::NotFound(_)) => Ok((fresh_state(transport, request).await?, StartMode::Fresh)),
        Err(e @ StateError::Corrupt { .. }) => {
            warn!(error = %e, "ignoring unusable state file, starting fresh");
            Ok((fresh_state(transport, request).await?, StartMode::Fresh))
        }
        Err(e) => Err(e).context("Failed to load download state"),
    }
}

/// The output must hold at least `resume_offset` bytes for a resume to be
/// contiguous. Extra bytes are trimmed by the engine once the 206 arrives.
async fn check_output(state: &TransferState) -> std::result::Result<(), String> {
    if state.resume_offset() == 0 {
        return Ok(());
    }
    match fs::metadata(state.output_path()).await {
        Ok(metadata) if metadata.len() >= state.resume_offset() => Ok(()),
        Ok(metadata) => Err(format!(
            "output holds only {} of {} confirmed bytes",
            metadata.len(),
            state.resume_offset()
        )),
        Err(e) => Err(format!("output file unavailable ({})", e)),
    }
}

async fn fresh_state<T: Transport>(transport: &T, request: &DownloadRequest) -> Result<TransferState> {
    let output = match &request.output {
        Some(output) => output.clone(),
        None => {
            let name = match transport.suggested_filename(&request.url).await {
                Some(name) => name,
                None => match filename_from_url(&request.url)? {
                    Some(name) => name,
                    None => get_filename_from_url(&request.url)?,
                },
            };
            get_unique_filepath(&request.output_dir.join(name))
        }
    };
    Ok(TransferState::new(request.url.clone(), output))
}

/// Runs exactly one transfer attempt for `request`.
pub async fn run_download<T, P, F>(
    transport: &T,
    request: DownloadRequest,
    config: &DownloadConfig,
    make_progress: F,
    cancel: CancellationToken,
) -> Result<RunOutcome>
where
    T: Transport,
    P: ProgressObserver,
    F: FnOnce(&TransferState) -> P,
{
    if let Some(parent) = request.state_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create state directory")?;
        }
    }

    let store = StateStore::new(&request.state_path);
    let (state, mode) = prepare_state(transport, &store, &request).await?;

    if mode == StartMode::Resuming && state.is_complete() {
        info!(
            output = %state.output_path().display(),
            "already complete ({}), nothing to do",
            HumanBytes(state.total_size())
        );
        return Ok(RunOutcome::AlreadyComplete);
    }

    match mode {
        StartMode::Resuming => info!(
            output = %state.output_path().display(),
            "resuming from {}",
            HumanBytes(state.resume_offset())
        ),
        StartMode::Fresh => info!(output = %state.output_path().display(), "starting new download"),
    }

    let output_path = state.output_path().to_path_buf();
    let progress = make_progress(&state);
    let mut engine = TransferEngine::new(state, store, progress, cancel, config.checkpoint_interval);
    let outcome = engine.attempt(transport).await;
    info!("{}", describe(&output_path, &outcome));
    if outcome.checkpoint_failures > 0 {
        warn!(
            failures = outcome.checkpoint_failures,
            "some in-flight state saves failed"
        );
    }

    if let Some(e) = outcome.save_error {
        return Err(e).context("Failed to save download state");
    }

    Ok(match outcome.status {
        AttemptStatus::Completed => RunOutcome::Completed {
            bytes_written: outcome.bytes_written,
        },
        AttemptStatus::Interrupted => RunOutcome::Paused {
            bytes_written: outcome.bytes_written,
        },
        AttemptStatus::Failed(e) => RunOutcome::Failed(e),
    })
}
