//! Streaming enhancement ingestor
//!
//! Opens an enhancement stream, trying each configured request method in
//! order, and appends the received chunks to the spec content in arrival
//! order. Content appended before a failure is kept.

use crate::backend::{bounded, SpecBackend, TextStream};
use crate::config::StreamMethod;
use crate::error::{BackendError, WorkbenchError};
use crate::model::SpecId;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Inserted between existing content and the first chunk
pub const SEPARATOR: &str = "\n\n";

/// Destination of streamed text
///
/// Appends must be visible to readers immediately so observers see the
/// content grow monotonically.
pub trait ContentSink: Send + Sync {
    /// Check if the content is currently empty
    fn content_is_empty(&self) -> bool;

    /// Append text at the end of the content
    fn append(&self, text: &str);
}

impl ContentSink for parking_lot::Mutex<String> {
    fn content_is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn append(&self, text: &str) {
        self.lock().push_str(text);
    }
}

/// Completed enhancement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhanceSummary {
    /// Method that established the stream
    pub method: StreamMethod,
    /// Non-empty chunks appended
    pub chunks: usize,
    /// Bytes appended, separator included
    pub bytes: usize,
}

/// Enhancement stream ingestor
#[derive(Clone)]
pub struct StreamingIngestor {
    backend: Arc<dyn SpecBackend>,
    methods: Vec<StreamMethod>,
    open_timeout: Duration,
    idle_timeout: Duration,
}

impl std::fmt::Debug for StreamingIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingIngestor")
            .field("methods", &self.methods)
            .field("open_timeout", &self.open_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl StreamingIngestor {
    /// Create new ingestor
    #[must_use]
    pub fn new(
        backend: Arc<dyn SpecBackend>,
        methods: Vec<StreamMethod>,
        open_timeout: Duration,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            methods,
            open_timeout,
            idle_timeout,
        }
    }

    /// Establish a stream, falling back through the configured methods
    ///
    /// Cancellation stops the fallback chain immediately.
    ///
    /// # Errors
    /// `EnhancementFailure` carrying the last method's failure
    pub async fn open(
        &self,
        id: &SpecId,
        cancel: &CancellationToken,
    ) -> Result<(StreamMethod, TextStream), WorkbenchError> {
        let mut last_error =
            BackendError::StreamUnavailable("no enhance method configured".to_string());

        for method in &self.methods {
            if cancel.is_cancelled() {
                return Err(WorkbenchError::EnhancementFailure(BackendError::Cancelled));
            }
            tracing::debug!(%id, %method, "opening enhancement stream");
            match bounded(
                self.open_timeout,
                cancel,
                self.backend.open_enhance_stream(id, *method),
            )
            .await
            {
                Ok(stream) => return Ok((*method, stream)),
                Err(BackendError::Cancelled) => {
                    return Err(WorkbenchError::EnhancementFailure(BackendError::Cancelled))
                }
                Err(e) => {
                    tracing::warn!(%id, %method, error = %e, "enhance method did not stream");
                    last_error = e;
                }
            }
        }

        tracing::error!(%id, error = %last_error, "no enhance method established a stream");
        Err(WorkbenchError::EnhancementFailure(last_error))
    }

    /// Open a stream and append every chunk to `sink`
    ///
    /// # Errors
    /// `EnhancementFailure` if no stream opens, the stream breaks, a chunk
    /// does not arrive within the idle timeout, or `cancel` fires
    #[tracing::instrument(skip(self, sink, cancel))]
    pub async fn ingest(
        &self,
        id: &SpecId,
        sink: &dyn ContentSink,
        cancel: &CancellationToken,
    ) -> Result<EnhanceSummary, WorkbenchError> {
        let (method, stream) = self.open(id, cancel).await?;
        tracing::info!(%id, %method, "enhancement stream established");
        self.pump(method, stream, sink, cancel).await
    }

    async fn pump(
        &self,
        method: StreamMethod,
        mut stream: TextStream,
        sink: &dyn ContentSink,
        cancel: &CancellationToken,
    ) -> Result<EnhanceSummary, WorkbenchError> {
        let mut summary = EnhanceSummary {
            method,
            chunks: 0,
            bytes: 0,
        };
        // Decided once, when the stream is established.
        let mut separator_due = !sink.content_is_empty();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(BackendError::Cancelled),
                item = tokio::time::timeout(self.idle_timeout, stream.next()) => {
                    item.map_err(|_| BackendError::Timeout {
                        duration_secs: self.idle_timeout.as_secs(),
                    })
                }
            };

            let chunk = match next {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(None) => break,
                Ok(Some(Err(e))) | Err(e) => {
                    tracing::error!(
                        chunks = summary.chunks,
                        error = %e,
                        "enhancement stream interrupted; partial content kept"
                    );
                    return Err(WorkbenchError::EnhancementFailure(e));
                }
            };

            if chunk.is_empty() {
                continue;
            }
            if separator_due {
                sink.append(SEPARATOR);
                summary.bytes += SEPARATOR.len();
                separator_due = false;
            }
            sink.append(&chunk);
            summary.chunks += 1;
            summary.bytes += chunk.len();
        }

        tracing::info!(chunks = summary.chunks, bytes = summary.bytes, "enhancement complete");
        Ok(summary)
    }
}
