//! Streaming answer transport
//!
//! Opens the question-answering endpoint and exposes its incrementally
//! delivered body as a lazy sequence of decoded text fragments.

mod decode;

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt, TryStreamExt};
use serde::Serialize;

use crate::{Error, Result};

pub use decode::Utf8Decoder;

/// Path of the streaming question-answering endpoint
pub const INITIAL_QUERY_PATH: &str = "/api/rag/initial_query";

/// Build the HTTP client shared by all ClAire API clients
///
/// Only the connect phase is bounded; answer streams may run for as long as
/// the server keeps producing.
///
/// # Errors
///
/// Returns error if the TLS backend cannot be initialized
pub fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()?;
    Ok(client)
}

/// Something that can answer a question about a session's notes
#[async_trait]
pub trait AnswerSource: Send + Sync {
    /// Ask a question and return the answer as a fragment stream
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the server rejects the request before
    /// any fragment is produced
    async fn ask(&self, query: &str, session_id: &str) -> Result<AnswerStream>;
}

/// Lazy, finite, non-restartable sequence of answer text fragments
///
/// Fragments come out in the order their bytes arrived. A fragment may end
/// in the middle of a word, so consumers must concatenate them. The source
/// byte stream is dropped exactly once: at end of input, after the first
/// error, or when this value is dropped.
pub struct AnswerStream {
    source: Option<BoxStream<'static, Result<Bytes>>>,
    decoder: Utf8Decoder,
    fragments: usize,
}

impl AnswerStream {
    /// Wrap a byte stream
    pub fn from_bytes<S>(source: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            source: Some(source.boxed()),
            decoder: Utf8Decoder::new(),
            fragments: 0,
        }
    }

    /// Wrap a streaming HTTP response body
    pub fn from_response(response: reqwest::Response) -> Self {
        Self::from_bytes(
            response
                .bytes_stream()
                .map_err(|e| Error::Stream(e.to_string())),
        )
    }

    /// Whether the underlying byte stream has been released
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.source.is_none()
    }

    fn release(&mut self) {
        if self.source.take().is_some() {
            tracing::debug!(fragments = self.fragments, "answer stream released");
        }
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            let Some(source) = this.source.as_mut() else {
                return Poll::Ready(None);
            };

            match source.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => {
                    let text = this.decoder.decode(&chunk);
                    if text.is_empty() {
                        continue;
                    }
                    this.fragments += 1;
                    return Poll::Ready(Some(Ok(text)));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.release();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.release();
                    return Poll::Ready(this.decoder.finish().map(Ok));
                }
            }
        }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        if self.source.is_some() {
            tracing::debug!(fragments = self.fragments, "answer stream abandoned");
        }
        self.release();
    }
}

impl std::fmt::Debug for AnswerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnswerStream")
            .field("released", &self.is_released())
            .field("fragments", &self.fragments)
            .finish_non_exhaustive()
    }
}

/// Body of the question-answering request
#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    session_id: &'a str,
}

/// Client for the RAG question-answering endpoint
#[derive(Debug, Clone)]
pub struct RagClient {
    client: reqwest::Client,
    base_url: String,
}

impl RagClient {
    /// Create a new RAG client
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `base_url` - Backend origin (e.g., `http://localhost:8000`)
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AnswerSource for RagClient {
    async fn ask(&self, query: &str, session_id: &str) -> Result<AnswerStream> {
        let url = format!("{}{INITIAL_QUERY_PATH}", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&QueryRequest { query, session_id })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = %body, "answer request rejected");
            return Err(Error::Transport {
                status: status.as_u16(),
            });
        }

        tracing::debug!(session_id, "answer stream opened");
        Ok(AnswerStream::from_response(response))
    }
}
