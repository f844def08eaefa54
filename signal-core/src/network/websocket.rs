// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! WebSocket Connector
//!
//! Production connector using tokio-tungstenite. Supports both ws://
//! (plaintext) and wss:// (rustls with webpki roots) endpoints. Every frame
//! carries one JSON envelope as text.

use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use super::error::SignalError;
use super::transport::{Connector, Endpoint, RawSocket, TransportResult};

/// Opens WebSocket connections for the socket transport.
///
/// # Example
///
/// ```ignore
/// use signal_core::network::{SocketTransport, WebSocketConnector};
///
/// let transport = SocketTransport::new(config, Arc::new(WebSocketConnector::new()));
/// ```
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a new WebSocket connector.
    pub fn new() -> Self {
        WebSocketConnector
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, endpoint: Endpoint) -> BoxFuture<'static, TransportResult<RawSocket>> {
        async move {
            let url = endpoint.url()?;
            let (socket, response) = connect_async(url.as_str()).await.map_err(|e| {
                debug!(%endpoint, error = %e, "WebSocket handshake failed");
                SignalError::from(e)
            })?;
            debug!(%endpoint, status = %response.status(), "WebSocket handshake complete");

            let (sink, stream) = socket.split();
            let sink = sink
                .sink_map_err(|e| SignalError::SendFailed(e.to_string()))
                .with(|text: String| future::ready(Ok::<_, SignalError>(Message::Text(text))));
            let stream = stream.filter_map(|frame| future::ready(decode_frame(frame)));

            Ok(RawSocket::new(Box::pin(sink), Box::pin(stream)))
        }
        .boxed()
    }
}

/// Maps a WebSocket frame to a text payload. Control frames are skipped.
fn decode_frame(frame: Result<Message, WsError>) -> Option<TransportResult<String>> {
    match frame {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => Some(
            String::from_utf8(bytes)
                .map_err(|e| SignalError::InvalidMessage(format!("binary frame: {}", e))),
        ),
        Ok(Message::Close(frame)) => {
            debug!(?frame, "Close frame received");
            Some(Err(SignalError::ConnectionClosed))
        }
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Err(err) => Some(Err(err.into())),
    }
}

// INLINE_TEST_REQUIRED: Tests private decode_frame for message classification
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_frame() {
        let decoded = decode_frame(Ok(Message::Text("hello".into())));
        assert_eq!(decoded, Some(Ok("hello".to_string())));
    }

    #[test]
    fn test_decode_skips_control_frames() {
        assert_eq!(decode_frame(Ok(Message::Ping(vec![1]))), None);
        assert_eq!(decode_frame(Ok(Message::Pong(vec![]))), None);
    }

    #[test]
    fn test_decode_close_frame_ends_connection() {
        let decoded = decode_frame(Ok(Message::Close(None)));
        assert_eq!(decoded, Some(Err(SignalError::ConnectionClosed)));
    }

    #[test]
    fn test_decode_read_errors() {
        assert_eq!(
            decode_frame(Err(WsError::ConnectionClosed)),
            Some(Err(SignalError::ConnectionClosed))
        );
        assert_eq!(
            decode_frame(Err(WsError::AlreadyClosed)),
            Some(Err(SignalError::ConnectionClosed))
        );
        assert!(matches!(
            decode_frame(Err(WsError::Utf8)),
            Some(Err(SignalError::InvalidMessage(_)))
        ));
        let reset = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            decode_frame(Err(WsError::Io(reset))),
            Some(Err(SignalError::ReceiveFailed(_)))
        ));
    }

    #[test]
    fn test_decode_invalid_binary_frame() {
        let decoded = decode_frame(Ok(Message::Binary(vec![0xff, 0xfe])));
        assert!(matches!(decoded, Some(Err(SignalError::InvalidMessage(_)))));
    }
}
