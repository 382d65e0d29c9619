//! WebSocket transport for the channel driver.
//!
//! Thin wrapper around `tokio-tungstenite` providing type-isolated
//! reader/writer halves. All WebSocket consumers in the crate should
//! use this module rather than `tokio-tungstenite` directly.
//!
//! # Architecture
//!
//! [`WsConnector`] implements the channel's [`Connector`] seam. Opening
//! validates the URL up front (an unusable endpoint is never retried), then
//! returns a handshake future that yields a ([`WsWriter`], [`WsReader`])
//! pair ready for use in the driver's `tokio::select!` loop.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::channel::transport::{
    ConnectFuture, Connector, FrameSink, FrameStream, TransportError, TransportEvent,
};

/// Close code reported when the backend closes without a status code.
const NO_STATUS_CODE: u16 = 1005;

/// Concrete WebSocket stream type (avoids repeating the 6-line generic everywhere).
type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Opens WebSocket connections to the control backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn open(&self, endpoint: &str) -> Result<ConnectFuture, TransportError> {
        let request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

        let uri = request.uri();
        if !matches!(uri.scheme_str(), Some("ws" | "wss")) {
            return Err(TransportError::InvalidEndpoint(format!(
                "{endpoint}: scheme must be ws:// or wss://"
            )));
        }
        if uri.host().map_or(true, str::is_empty) {
            return Err(TransportError::InvalidEndpoint(format!(
                "{endpoint}: missing host"
            )));
        }

        Ok(Box::pin(async move {
            let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

            let (sink, stream) = ws_stream.split();
            let writer: Box<dyn FrameSink> = Box::new(WsWriter { sink });
            let reader: Box<dyn FrameStream> = Box::new(WsReader { stream });
            Ok((writer, reader))
        }))
    }
}

/// Write half of a WebSocket connection.
#[derive(Debug)]
pub struct WsWriter {
    sink: futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
}

#[async_trait]
impl FrameSink for WsWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(tungstenite::Message::Text(text))
            .await
            .map_err(|e| TransportError::Io(format!("WebSocket send failed: {e}")))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        self.sink
            .send(tungstenite::Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Io(format!("WebSocket close failed: {e}")))?;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Io(format!("WebSocket close failed: {e}")))
    }
}

/// Read half of a WebSocket connection.
#[derive(Debug)]
pub struct WsReader {
    stream: futures_util::stream::SplitStream<WsStream>,
}

#[async_trait]
impl FrameStream for WsReader {
    /// Ping and pong are answered by tungstenite itself; raw frames are skipped.
    async fn next_event(&mut self) -> Option<Result<TransportEvent, TransportError>> {
        loop {
            match self.stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return Some(Ok(TransportEvent::Text(text)));
                }
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    return Some(Ok(TransportEvent::Binary(data)));
                }
                Some(Ok(tungstenite::Message::Close(close_frame))) => {
                    let (code, reason) = close_frame
                        .map(|cf| (cf.code.into(), cf.reason.to_string()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    return Some(Ok(TransportEvent::Close { code, reason }));
                }
                Some(Ok(
                    tungstenite::Message::Ping(_)
                    | tungstenite::Message::Pong(_)
                    | tungstenite::Message::Frame(_),
                )) => continue,
                Some(Err(e)) => {
                    return Some(Err(TransportError::Io(format!("WebSocket read error: {e}"))));
                }
                None => return None,
            }
        }
    }
}

/// Convert an HTTP(S) URL to WS(S) scheme.
///
/// Passes `ws://` and `wss://` through unchanged.
#[must_use]
pub fn http_to_ws_scheme(url: &str) -> String {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else {
        url.replace("https://", "wss://")
            .replace("http://", "ws://")
    }
}

/// WebSocket endpoint for a backend base URL and socket path.
///
/// `endpoint_from_server_url("http://arm.local:8080/", "/ws")` gives
/// `ws://arm.local:8080/ws`.
#[must_use]
pub fn endpoint_from_server_url(server_url: &str, ws_path: &str) -> String {
    let base = http_to_ws_scheme(server_url.trim_end_matches('/'));
    if ws_path.is_empty() {
        base
    } else if ws_path.starts_with('/') {
        format!("{base}{ws_path}")
    } else {
        format!("{base}/{ws_path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_to_ws_scheme_https() {
        assert_eq!(
            http_to_ws_scheme("https://arm.example.com"),
            "wss://arm.example.com"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_http() {
        assert_eq!(
            http_to_ws_scheme("http://localhost:8080"),
            "ws://localhost:8080"
        );
    }

    #[test]
    fn test_http_to_ws_scheme_ws_passthrough() {
        assert_eq!(
            http_to_ws_scheme("ws://localhost:8080/ws"),
            "ws://localhost:8080/ws"
        );
    }

    #[test]
    fn test_endpoint_from_server_url_joins_path() {
        assert_eq!(
            endpoint_from_server_url("http://arm.local:8080/", "/ws"),
            "ws://arm.local:8080/ws"
        );
        assert_eq!(
            endpoint_from_server_url("https://arm.local", "ws"),
            "wss://arm.local/ws"
        );
        assert_eq!(
            endpoint_from_server_url("http://arm.local:8080", ""),
            "ws://arm.local:8080"
        );
    }

    #[test]
    fn test_open_invalid_url_is_invalid_endpoint() {
        let result = WsConnector.open("not-a-url");
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_open_http_scheme_is_invalid_endpoint() {
        let result = WsConnector.open("http://localhost:8080/ws");
        assert!(matches!(result, Err(TransportError::InvalidEndpoint(_))));
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_handshake() {
        let handshake = WsConnector.open("ws://127.0.0.1:1/ws").unwrap();
        let result = handshake.await;
        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    }
}
