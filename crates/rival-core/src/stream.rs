//! Best-effort capture of a live message stream.
//!
//! A capture collects up to `max_chunks` data messages and stops early when
//! the peer closes, the stream goes quiet for `idle_timeout`, the overall
//! deadline passes, or the connection breaks. Only a failure to connect is an
//! error; everything after the handshake yields whatever arrived. Messages
//! lost to a reconnect are not replayed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::error::StreamError;
use crate::traits::{StreamConnection, StreamConnector};

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub max_chunks: usize,
    pub connect_timeout: Duration,
    /// Longest wait for any single message.
    pub idle_timeout: Duration,
    /// Cap on the whole capture, handshake included.
    pub deadline: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_chunks: 10,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Why a capture stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    ChunkLimit,
    Closed,
    Idle,
    Deadline,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamCapture {
    pub url: String,
    pub chunks: Vec<String>,
    /// Chunks joined by newlines.
    pub content: String,
    pub chunks_received: usize,
    pub end: StreamEnd,
}

impl StreamCapture {
    fn new(url: &str, chunks: Vec<String>, end: StreamEnd) -> Self {
        Self {
            url: url.to_string(),
            content: chunks.join("\n"),
            chunks_received: chunks.len(),
            chunks,
            end,
        }
    }
}

#[derive(Clone)]
pub struct StreamRetriever {
    connector: Arc<dyn StreamConnector>,
    config: StreamConfig,
}

impl StreamRetriever {
    pub fn new(connector: Arc<dyn StreamConnector>, config: StreamConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Captures up to `max_chunks` messages (the configured cap when `None`).
    pub async fn capture(&self, url: &str, max_chunks: Option<usize>) -> Result<StreamCapture, StreamError> {
        validate_stream_url(url)?;
        let max_chunks = max_chunks.unwrap_or(self.config.max_chunks).max(1);
        let deadline_at = Instant::now() + self.config.deadline;
        let connect_timeout = self.config.connect_timeout.min(self.config.deadline);

        let mut connection = match tokio::time::timeout(connect_timeout, self.connector.connect(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StreamError::Timeout {
                    url: url.to_string(),
                    after: connect_timeout,
                });
            }
        };
        tracing::debug!(url = %url, max_chunks, "Stream connected");

        let (chunks, end) = self.collect(connection.as_mut(), max_chunks, deadline_at).await;
        connection.close().await;

        match &end {
            StreamEnd::Error(message) => {
                tracing::warn!(url = %url, chunks = chunks.len(), error = %message, "Stream broke, keeping partial capture")
            }
            end => tracing::info!(url = %url, chunks = chunks.len(), end = ?end, "Stream captured"),
        }
        Ok(StreamCapture::new(url, chunks, end))
    }

    async fn collect(
        &self,
        connection: &mut dyn StreamConnection,
        max_chunks: usize,
        deadline_at: Instant,
    ) -> (Vec<String>, StreamEnd) {
        let mut chunks = Vec::new();
        while chunks.len() < max_chunks {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return (chunks, StreamEnd::Deadline);
            }
            let wait = self.config.idle_timeout.min(remaining);
            match tokio::time::timeout(wait, connection.next_message()).await {
                Ok(Ok(Some(message))) => chunks.push(message),
                Ok(Ok(None)) => return (chunks, StreamEnd::Closed),
                Ok(Err(e)) => return (chunks, StreamEnd::Error(e.to_string())),
                Err(_) if wait < self.config.idle_timeout => return (chunks, StreamEnd::Deadline),
                Err(_) => return (chunks, StreamEnd::Idle),
            }
        }
        (chunks, StreamEnd::ChunkLimit)
    }
}

/// Accepts absolute `ws://` and `wss://` URLs only.
pub fn validate_stream_url(url: &str) -> Result<(), StreamError> {
    let invalid = |reason: String| StreamError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some() => Ok(()),
        "ws" | "wss" => Err(invalid("URL has no host".to_string())),
        scheme => Err(invalid(format!("scheme '{scheme}' is not a stream (use ws:// or wss://)"))),
    }
}

/// True when `raw` names a stream rather than a page.
pub fn is_stream_url(raw: &str) -> bool {
    let lower = raw.trim_start().to_ascii_lowercase();
    lower.starts_with("ws://") || lower.starts_with("wss://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockStream, MockStreamConnector};

    fn retriever(connector: MockStreamConnector) -> StreamRetriever {
        StreamRetriever::new(Arc::new(connector), StreamConfig::default())
    }

    #[tokio::test]
    async fn stops_at_chunk_limit() {
        let connector = MockStreamConnector::new(MockStream::messages(&["a", "b", "c", "d"]));
        let capture = retriever(connector.clone())
            .capture("wss://feed.test/live", Some(3))
            .await
            .unwrap();

        assert_eq!(capture.chunks, vec!["a", "b", "c"]);
        assert_eq!(capture.content, "a\nb\nc");
        assert_eq!(capture.chunks_received, 3);
        assert_eq!(capture.end, StreamEnd::ChunkLimit);
        assert!(connector.closed());
    }

    #[tokio::test]
    async fn peer_close_ends_capture_early() {
        let connector = MockStreamConnector::new(MockStream::messages(&["only"]));
        let capture = retriever(connector).capture("ws://feed.test/", None).await.unwrap();
        assert_eq!(capture.chunks, vec!["only"]);
        assert_eq!(capture.end, StreamEnd::Closed);
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_capture() {
        let stream = MockStream::messages(&["one", "two"]).then_fail("connection reset");
        let capture = retriever(MockStreamConnector::new(stream))
            .capture("wss://feed.test/", None)
            .await
            .unwrap();
        assert_eq!(capture.chunks, vec!["one", "two"]);
        assert!(matches!(capture.end, StreamEnd::Error(ref m) if m.contains("connection reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_stream_ends_idle() {
        let stream = MockStream::messages(&["hello"]).then_hang();
        let capture = retriever(MockStreamConnector::new(stream))
            .capture("wss://feed.test/", None)
            .await
            .unwrap();
        assert_eq!(capture.chunks, vec!["hello"]);
        assert_eq!(capture.end, StreamEnd::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handshake_times_out() {
        let connector = MockStreamConnector::new(MockStream::messages(&[])).with_connect_delay(Duration::from_secs(60));
        let err = retriever(connector).capture("wss://feed.test/", None).await.unwrap_err();
        assert!(matches!(err, StreamError::Timeout { .. }));
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let connector = MockStreamConnector::refusing("connection refused");
        let err = retriever(connector).capture("wss://feed.test/", None).await.unwrap_err();
        assert!(matches!(err, StreamError::Connect { ref message, .. } if message == "connection refused"));
    }

    #[tokio::test]
    async fn http_urls_are_rejected_before_connecting() {
        let connector = MockStreamConnector::new(MockStream::messages(&["x"]));
        let err = retriever(connector.clone())
            .capture("https://feed.test/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidUrl { .. }));
        assert_eq!(connector.connects(), 0);
    }

    #[test]
    fn stream_url_detection() {
        assert!(is_stream_url("wss://feed.test/"));
        assert!(is_stream_url("  WS://feed.test/"));
        assert!(!is_stream_url("https://feed.test/"));
    }
}
