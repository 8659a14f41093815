use futures::StreamExt;
use rival_core::error::{StreamError, TransportError};
use rival_core::stream::validate_stream_url;
use rival_core::traits::{StreamConnection, StreamConnector};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::transport::ensure_public_host;

/// WebSocket connector over tokio-tungstenite.
///
/// Applies the same SSRF guard as [`ReqwestTransport`](crate::ReqwestTransport)
/// unless [`allow_private_urls`](Self::allow_private_urls) is set.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ssrf_protection: bool,
}

impl WsConnector {
    pub fn new() -> Self {
        Self {
            ssrf_protection: true,
        }
    }

    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StreamConnector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>, StreamError> {
        validate_stream_url(url)?;
        if self.ssrf_protection {
            let parsed = Url::parse(url).map_err(|e| StreamError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
            ensure_public_host(&parsed).await.map_err(|e| match e {
                TransportError::InvalidUrl(reason) => StreamError::InvalidUrl {
                    url: url.to_string(),
                    reason,
                },
                other => StreamError::Connect {
                    url: url.to_string(),
                    message: other.to_string(),
                },
            })?;
        }

        let (socket, response) = connect_async(url).await.map_err(|e| StreamError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(url = %url, status = response.status().as_u16(), "WebSocket handshake complete");
        Ok(Box::new(WsConnection { socket }))
    }
}

struct WsConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl StreamConnection for WsConnection {
    async fn next_message(&mut self) -> Result<Option<String>, StreamError> {
        loop {
            match self.socket.next().await {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
                }
                // Control frames carry no content.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(StreamError::Protocol(e.to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures::SinkExt;
    use rival_core::stream::{StreamConfig, StreamEnd, StreamRetriever};
    use tokio::net::TcpListener;

    /// Serves one connection: sends `messages`, then closes.
    async fn serve_once(messages: &'static [&'static str]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            for message in messages {
                ws.send(Message::text(message.to_string())).await.unwrap();
            }
            let _ = ws.close(None).await;
        });
        format!("ws://{addr}/feed")
    }

    #[tokio::test]
    async fn captures_messages_from_a_local_server() {
        let url = serve_once(&["alpha", "beta"]).await;
        let retriever = StreamRetriever::new(Arc::new(WsConnector::new().allow_private_urls()), StreamConfig::default());

        let capture = retriever.capture(&url, None).await.unwrap();
        assert_eq!(capture.chunks, vec!["alpha", "beta"]);
        assert_eq!(capture.end, StreamEnd::Closed);
    }

    #[tokio::test]
    async fn private_hosts_are_refused_by_default() {
        let err = WsConnector::new().connect("ws://127.0.0.1:9/feed").await.err().unwrap();
        assert!(matches!(err, StreamError::InvalidUrl { ref reason, .. } if reason.contains("SSRF blocked")));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = WsConnector::new()
            .allow_private_urls()
            .connect(&format!("ws://{addr}/"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StreamError::Connect { .. }));
    }
}
