use bytes::Bytes;
use indicatif::HumanBytes;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StateError, TransferError, TransportFailure};
use crate::progress::ProgressObserver;
use crate::response::{self, ServerBehavior};
use crate::state::{StateStore, TransferState};
use crate::transport::{Completion, RangeRequest, ResponseHead, ResponseSink, Transport};

/// Final classification of one attempt.
#[derive(Debug)]
pub enum AttemptStatus {
    /// Every byte of the resource is on disk.
    Completed,
    /// Stopped at a chunk boundary because cancellation was requested.
    Interrupted,
    Failed(TransferError),
}

#[derive(Debug)]
pub struct AttemptOutcome {
    /// Bytes written to the output file during this attempt.
    pub bytes_written: u64,
    pub status: AttemptStatus,
    /// Set when the closing state save failed.
    pub save_error: Option<StateError>,
    /// In-flight checkpoint saves that failed. The transfer carried on past
    /// them.
    pub checkpoint_failures: u32,
}

/// Drives one download attempt and is the only writer of its `TransferState`.
pub struct TransferEngine<P> {
    state: TransferState,
    store: StateStore,
    progress: P,
    cancel: CancellationToken,
    checkpoint_interval: Duration,
}

impl<P: ProgressObserver> TransferEngine<P> {
    pub fn new(
        state: TransferState,
        store: StateStore,
        progress: P,
        cancel: CancellationToken,
        checkpoint_interval: Duration,
    ) -> Self {
        Self {
            state,
            store,
            progress,
            cancel,
            checkpoint_interval,
        }
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    #[cfg(test)]
    pub fn progress(&self) -> &P {
        &self.progress
    }

    /// Requests the remainder of the resource from `resume_offset`, streams it
    /// to the output file and saves the state before returning, whatever the
    /// outcome.
    pub async fn attempt<T: Transport>(&mut self, transport: &T) -> AttemptOutcome {
        let request = RangeRequest {
            url: self.state.url().to_string(),
            offset: self.state.resume_offset(),
        };
        info!(
            url = %request.url,
            offset = request.offset,
            "requesting {} onwards",
            HumanBytes(request.offset)
        );

        let mut sink = AttemptSink {
            state: &mut self.state,
            store: &self.store,
            progress: &mut self.progress,
            cancel: &self.cancel,
            requested_offset: request.offset,
            response_base: request.offset,
            behavior: None,
            output: None,
            bytes_written: 0,
            checkpoint_failures: 0,
            checkpoint_interval: self.checkpoint_interval,
            last_checkpoint: Instant::now(),
        };

        let result = transport.perform(&request, &mut sink, &self.cancel).await;
        let closed = sink.close().await;
        let bytes_written = sink.bytes_written;
        let behavior = sink.behavior;
        let checkpoint_failures = sink.checkpoint_failures;

        let status = match (result, closed) {
            (Err(e), _) | (Ok(_), Err(e)) => AttemptStatus::Failed(e),
            (Ok(Completion::Cancelled), Ok(())) => AttemptStatus::Interrupted,
            (Ok(Completion::Finished), Ok(())) => {
                match self.verify_finished(behavior, bytes_written) {
                    Ok(()) => AttemptStatus::Completed,
                    Err(e) => AttemptStatus::Failed(e),
                }
            }
        };

        let save_error = self.store.save(&self.state).await.err();
        if let Some(e) = &save_error {
            warn!(error = %e, "failed to save transfer state");
        }

        AttemptOutcome {
            bytes_written,
            status,
            save_error,
            checkpoint_failures,
        }
    }

    fn verify_finished(
        &self,
        behavior: Option<ServerBehavior>,
        bytes_written: u64,
    ) -> Result<(), TransferError> {
        if behavior == Some(ServerBehavior::RangeAlreadySatisfied) {
            return Ok(());
        }

        let declared = self.state.declared_content_length();
        if declared > 0 && bytes_written < declared {
            return Err(TransportFailure::Incomplete {
                received: bytes_written,
                expected: declared,
            }
            .into());
        }

        let total = self.state.total_size();
        if total > 0 && self.state.resume_offset() < total {
            return Err(TransportFailure::Incomplete {
                received: self.state.resume_offset(),
                expected: total,
            }
            .into());
        }
        Ok(())
    }
}

/// Per-attempt receiver handed to the transport.
///
/// The output file is opened lazily in `on_head`, once the status says
/// whether to append or to rewrite from byte 0.
struct AttemptSink<'a, P> {
    state: &'a mut TransferState,
    store: &'a StateStore,
    progress: &'a mut P,
    cancel: &'a CancellationToken,
    requested_offset: u64,
    /// Offset at which the current response body starts.
    response_base: u64,
    behavior: Option<ServerBehavior>,
    output: Option<File>,
    bytes_written: u64,
    checkpoint_failures: u32,
    checkpoint_interval: Duration,
    last_checkpoint: Instant,
}

impl<P: ProgressObserver> AttemptSink<'_, P> {
    async fn open_output(&mut self, behavior: ServerBehavior) -> Result<(), TransferError> {
        let path = self.state.output_path().to_path_buf();
        let file = if behavior.appends() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&path)
                .await
                .map_err(|e| TransferError::io(&path, e))?;
            let on_disk = file
                .metadata()
                .await
                .map_err(|e| TransferError::io(&path, e))?
                .len();
            if on_disk < self.requested_offset {
                return Err(TransferError::io(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!(
                            "output holds {} bytes, fewer than the resume offset {}",
                            on_disk, self.requested_offset
                        ),
                    ),
                ));
            }
            if on_disk > self.requested_offset {
                warn!(
                    on_disk,
                    resume_offset = self.requested_offset,
                    "discarding unconfirmed bytes past the resume offset"
                );
                file.set_len(self.requested_offset)
                    .await
                    .map_err(|e| TransferError::io(&path, e))?;
            }
            file.seek(SeekFrom::Start(self.requested_offset))
                .await
                .map_err(|e| TransferError::io(&path, e))?;
            file
        } else {
            File::create(&path)
                .await
                .map_err(|e| TransferError::io(&path, e))?
        };
        self.output = Some(file);
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), TransferError> {
        let path = self.state.output_path().to_path_buf();
        let Some(file) = self.output.as_mut() else {
            return Err(TransferError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotConnected, "body before response head"),
            ));
        };
        file.write_all(chunk)
            .await
            .map_err(|e| TransferError::io(&path, e))?;
        file.flush().await.map_err(|e| TransferError::io(&path, e))
    }

    /// Syncs the output and saves the state, so the saved offset never
    /// claims more than is on disk.
    ///
    /// A failed save does not abort the transfer. It is counted into
    /// `checkpoint_failures`; only the closing save is reported as an error.
    async fn checkpoint(&mut self) -> Result<(), TransferError> {
        if let Some(file) = self.output.as_mut() {
            file.sync_data()
                .await
                .map_err(|e| TransferError::io(self.state.output_path(), e))?;
        }
        if let Err(e) = self.store.save(self.state).await {
            warn!(error = %e, "checkpoint failed");
            self.checkpoint_failures += 1;
        }
        self.last_checkpoint = Instant::now();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        if let Some(mut file) = self.output.take() {
            let path = self.state.output_path();
            file.flush().await.map_err(|e| TransferError::io(path, e))?;
            file.sync_all().await.map_err(|e| TransferError::io(path, e))?;
        }
        Ok(())
    }

    fn total_known(&self) -> u64 {
        match (self.state.total_size(), self.state.declared_content_length()) {
            (0, 0) => 0,
            (0, declared) => self.response_base + declared,
            (total, _) => total,
        }
    }
}

impl<P: ProgressObserver> ResponseSink for AttemptSink<'_, P> {
    async fn on_head(&mut self, head: ResponseHead) -> Result<(), TransferError> {
        info!("Server respond code: {}", head.status);
        let behavior = response::interpret(self.state, self.requested_offset, &head)?;
        match behavior {
            ServerBehavior::PartialContentConfirmed => {
                debug!("server honored the range request");
            }
            ServerBehavior::RangeNotSupported => {
                info!("server does not support ranges, rewriting output from byte 0");
            }
            ServerBehavior::FullContentResumable | ServerBehavior::RangeAlreadySatisfied => {}
        }

        self.response_base = self.state.resume_offset();
        self.behavior = Some(behavior);
        if behavior != ServerBehavior::RangeAlreadySatisfied {
            self.open_output(behavior).await?;
        }
        Ok(())
    }

    async fn on_body_chunk(&mut self, chunk: Bytes) -> Result<ControlFlow<()>, TransferError> {
        let len = chunk.len() as u64;
        if self.behavior == Some(ServerBehavior::RangeAlreadySatisfied) {
            debug!(len, "discarding 416 response body");
            return Ok(ControlFlow::Continue(()));
        }
        let total = self.state.total_size();
        if total > 0 && self.state.resume_offset() + len > total {
            return Err(TransportFailure::Overrun { total }.into());
        }

        self.write_chunk(&chunk).await?;
        self.state.advance(len);
        self.bytes_written += len;

        if self.last_checkpoint.elapsed() >= self.checkpoint_interval {
            self.checkpoint().await?;
        }

        if self.cancel.is_cancelled() {
            return Ok(ControlFlow::Break(()));
        }
        Ok(ControlFlow::Continue(()))
    }

    fn on_progress(&mut self, _received: u64, _response_length: u64) {
        let total = self.total_known();
        self.progress.on_progress(self.state.resume_offset(), total);
    }
}

pub fn describe(path: &Path, outcome: &AttemptOutcome) -> String {
    match &outcome.status {
        AttemptStatus::Completed => format!(
            "Completed {} ({} this run)",
            path.display(),
            HumanBytes(outcome.bytes_written)
        ),
        AttemptStatus::Interrupted => format!(
            "Paused {} after {} this run",
            path.display(),
            HumanBytes(outcome.bytes_written)
        ),
        AttemptStatus::Failed(e) => format!("Failed {}: {}", path.display(), e),
    }
}
