//! In-process transport and progress doubles for tests.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{TransferError, TransportFailure};
use crate::progress::ProgressObserver;
use crate::transport::{Completion, RangeRequest, ResponseHead, ResponseSink, Transport};

/// Deterministic test payload of `len` bytes.
pub fn resource(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Body nginx sends with a 416.
const RANGE_NOT_SATISFIABLE_PAGE: &[u8] =
    b"<html><head><title>416 Requested Range Not Satisfiable</title></head></html>";

/// Serves one resource, honoring `Range` the way a well-behaved server does
/// unless told otherwise.
pub struct FakeServer {
    body: Vec<u8>,
    chunk_size: usize,
    honor_ranges: bool,
    status: Option<u16>,
    fail_after: Option<usize>,
    truncate_body: Option<usize>,
    announce_total: Option<u64>,
    send_content_length: bool,
    filename: Option<String>,
    requests: Mutex<Vec<u64>>,
    pub calls: AtomicUsize,
}

impl FakeServer {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            chunk_size: 256,
            honor_ranges: true,
            status: None,
            fail_after: None,
            truncate_body: None,
            announce_total: None,
            send_content_length: true,
            filename: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Always answer 200 with the full body.
    pub fn ignore_ranges(mut self) -> Self {
        self.honor_ranges = false;
        self
    }

    /// Answer with `status` and no body.
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Fail the stream once sending another chunk would pass `bytes`.
    pub fn fail_after(mut self, bytes: usize) -> Self {
        self.fail_after = Some(bytes);
        self
    }

    /// End the body early after `bytes`, without an error.
    pub fn truncate_body(mut self, bytes: usize) -> Self {
        self.truncate_body = Some(bytes);
        self
    }

    /// Claim a different total in `Content-Range`.
    pub fn announce_total(mut self, total: u64) -> Self {
        self.announce_total = Some(total);
        self
    }

    /// Stream bodies without a `Content-Length` header.
    pub fn without_content_length(mut self) -> Self {
        self.send_content_length = false;
        self
    }

    pub fn filename(mut self, name: &str) -> Self {
        self.filename = Some(name.to_string());
        self
    }

    pub fn requested_offsets(&self) -> Vec<u64> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, offset: u64) -> (ResponseHead, &[u8]) {
        let len = self.body.len() as u64;
        if let Some(status) = self.status {
            return (ResponseHead::new(status), &[]);
        }
        if !self.honor_ranges || offset == 0 {
            let head = self.with_length(ResponseHead::new(200), len);
            return (head, &self.body);
        }
        if offset >= len {
            let head = ResponseHead::new(416)
                .with_header("Content-Type", "text/html")
                .with_header("Content-Length", RANGE_NOT_SATISFIABLE_PAGE.len().to_string())
                .with_header("Content-Range", format!("bytes */{}", len));
            return (head, RANGE_NOT_SATISFIABLE_PAGE);
        }
        let total = self.announce_total.unwrap_or(len);
        let head = self
            .with_length(ResponseHead::new(206), len - offset)
            .with_header(
                "Content-Range",
                format!("bytes {}-{}/{}", offset, len - 1, total),
            );
        (head, &self.body[offset as usize..])
    }

    fn with_length(&self, head: ResponseHead, length: u64) -> ResponseHead {
        if self.send_content_length {
            head.with_header("Content-Length", length.to_string())
        } else {
            head
        }
    }
}

impl Transport for FakeServer {
    async fn perform<S: ResponseSink>(
        &self,
        request: &RangeRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Completion, TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.offset);

        let (head, body) = self.respond(request.offset);
        let response_length = body.len() as u64;
        let body = match self.truncate_body {
            Some(limit) => &body[..limit.min(body.len())],
            None => body,
        };
        sink.on_head(head).await?;

        let mut sent = 0usize;
        for chunk in body.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                return Ok(Completion::Cancelled);
            }
            if let Some(limit) = self.fail_after {
                if sent + chunk.len() > limit {
                    return Err(TransportFailure::Stream("connection reset by peer".into()).into());
                }
            }
            sent += chunk.len();
            if sink
                .on_body_chunk(Bytes::copy_from_slice(chunk))
                .await?
                .is_break()
            {
                return Ok(Completion::Cancelled);
            }
            sink.on_progress(sent as u64, response_length);
        }
        Ok(Completion::Finished)
    }

    async fn suggested_filename(&self, _url: &str) -> Option<String> {
        self.filename.clone()
    }
}

/// Records every progress report; optionally cancels after the Nth one.
#[derive(Default)]
pub struct RecordingProgress {
    calls: Vec<(u64, u64)>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl RecordingProgress {
    pub fn cancelling_after(reports: usize, cancel: CancellationToken) -> Self {
        Self {
            calls: Vec::new(),
            cancel_after: Some((reports, cancel)),
        }
    }

    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.clone()
    }
}

impl ProgressObserver for RecordingProgress {
    fn on_progress(&mut self, transferred: u64, total: u64) {
        self.calls.push((transferred, total));
        if let Some((limit, cancel)) = &self.cancel_after {
            if self.calls.len() >= *limit {
                cancel.cancel();
            }
        }
    }
}
