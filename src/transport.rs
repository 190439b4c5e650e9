//! HTTP transport capability.
//!
//! The engine never talks to `reqwest` directly. It hands a [`ResponseSink`] to a
//! [`Transport`], which delivers the response head first and then each body
//! chunk in order.

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{header, Client};
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::DownloadConfig;
use crate::error::{TransferError, TransportFailure};

/// A GET for `url` starting at byte `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub url: String,
    pub offset: u64,
}

impl RangeRequest {
    /// Value of the `Range` header, if one is needed.
    pub fn range_header(&self) -> Option<String> {
        (self.offset > 0).then(|| format!("bytes={}-", self.offset))
    }
}

/// Status line and headers of a response, before any body bytes.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    #[cfg(test)]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    fn from_response(response: &reqwest::Response) -> Self {
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            status: response.status().as_u16(),
            headers,
        }
    }
}

/// How a `perform` call ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The body was delivered to its end.
    Finished,
    /// Stopped early because of cancellation or because the sink asked to stop.
    Cancelled,
}

/// Receiver side of a transfer, implemented by the engine.
pub trait ResponseSink: Send {
    /// Called once, before any body chunk. An error aborts the request.
    fn on_head(&mut self, head: ResponseHead)
        -> impl Future<Output = Result<(), TransferError>> + Send;

    /// Called for each body chunk in order. `Break` stops the transfer cleanly.
    fn on_body_chunk(
        &mut self,
        chunk: Bytes,
    ) -> impl Future<Output = Result<ControlFlow<()>, TransferError>> + Send;

    /// Bytes received in this response so far, and its length if announced.
    fn on_progress(&mut self, received: u64, response_length: u64);
}

pub trait Transport: Send + Sync {
    fn perform<S: ResponseSink>(
        &self,
        request: &RangeRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Completion, TransferError>> + Send;

    /// Filename announced by the server for `url`, if any.
    fn suggested_filename(&self, _url: &str) -> impl Future<Output = Option<String>> + Send {
        async { None }
    }
}

pub struct HttpTransport {
    client: Client,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl HttpTransport {
    pub fn new(config: &DownloadConfig) -> Result<Self, TransferError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| TransportFailure::Connect(e.to_string()))?;

        Ok(Self {
            client,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        })
    }
}

impl Transport for HttpTransport {
    async fn perform<S: ResponseSink>(
        &self,
        request: &RangeRequest,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<Completion, TransferError> {
        let mut builder = self.client.get(&request.url);
        if let Some(range) = request.range_header() {
            builder = builder.header(header::RANGE, range);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Completion::Cancelled),
            sent = with_deadline(Some(self.connect_timeout), builder.send()) => {
                sent?.map_err(classify_reqwest_error)?
            }
        };

        let response_length = response.content_length().unwrap_or(0);
        sink.on_head(ResponseHead::from_response(&response)).await?;

        let mut stream = response.bytes_stream();
        let mut received = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Completion::Cancelled),
                next = with_deadline(self.read_timeout, stream.next()) => next?,
            };
            let chunk = match next {
                Some(chunk) => chunk.map_err(classify_reqwest_error)?,
                None => break,
            };
            if chunk.is_empty() {
                continue;
            }

            received += chunk.len() as u64;
            if sink.on_body_chunk(chunk).await?.is_break() {
                return Ok(Completion::Cancelled);
            }
            sink.on_progress(received, response_length);
        }

        Ok(Completion::Finished)
    }

    async fn suggested_filename(&self, url: &str) -> Option<String> {
        let response = with_deadline(Some(self.connect_timeout), self.client.head(url).send())
            .await
            .ok()?
            .ok()?;
        let disposition = response.headers().get(header::CONTENT_DISPOSITION)?;
        crate::utils::filename_from_content_disposition(disposition.to_str().ok()?)
    }
}

async fn with_deadline<F: Future>(
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output, TransferError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| TransportFailure::Timeout.into()),
        None => Ok(future.await),
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> TransferError {
    let failure = if e.is_timeout() {
        TransportFailure::Timeout
    } else if e.is_connect() || e.is_request() || e.is_redirect() || e.is_builder() {
        TransportFailure::Connect(e.to_string())
    } else {
        TransportFailure::Stream(e.to_string())
    };
    failure.into()
}
