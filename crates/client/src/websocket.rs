//! WebSocket connector for the realtime channel.
//!
//! Splits the socket into a writer task and a reader task bridged to the
//! plain text-frame pipes of a [`Connection`]. Closing either pipe tears the
//! socket down.

use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::realtime::{ChannelConnector, Connection};

const OUTBOUND_BUFFER: usize = 64;
const INBOUND_BUFFER: usize = 256;

pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ChannelConnector for WebSocketConnector {
    fn connect(&self, credential: &str) -> BoxFuture<'_, Result<Connection>> {
        let bearer = format!("Bearer {credential}");
        async move {
            let mut request = self
                .url
                .as_str()
                .into_client_request()
                .map_err(|e| ClientError::Config(format!("invalid realtime url: {e}")))?;
            let value = HeaderValue::from_str(&bearer)
                .map_err(|e| ClientError::InvalidToken(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);

            let (stream, _) = connect_async(request)
                .await
                .map_err(|e| ClientError::Network(format!("websocket handshake failed: {e}")))?;
            info!(
                component = "websocket",
                event = "ws.connected",
                url = %self.url,
                "WebSocket connected"
            );

            let (mut sink, mut source) = stream.split();
            let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
            let (inbound_tx, inbound_rx) = mpsc::channel::<String>(INBOUND_BUFFER);
            let (pong_tx, mut pong_rx) = mpsc::channel::<Message>(8);

            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        text = outbound_rx.recv() => match text {
                            Some(text) => Message::Text(text.into()),
                            None => break,
                        },
                        Some(pong) = pong_rx.recv() => pong,
                    };
                    if let Err(e) = sink.send(frame).await {
                        warn!(
                            component = "websocket",
                            event = "ws.send_failed",
                            error = %e,
                            "WebSocket send failed"
                        );
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = pong_tx.send(Message::Pong(data)).await;
                        }
                        Ok(Message::Close(_)) => {
                            debug!(
                                component = "websocket",
                                event = "ws.close_frame",
                                "Server sent close frame"
                            );
                            break;
                        }
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(
                                component = "websocket",
                                event = "ws.read_failed",
                                error = %e,
                                "WebSocket read failed"
                            );
                            break;
                        }
                    }
                }
                info!(
                    component = "websocket",
                    event = "ws.closed",
                    "WebSocket closed"
                );
            });

            Ok(Connection {
                outbound: outbound_tx,
                inbound: inbound_rx,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invalid_url_is_a_config_error() {
        let connector = WebSocketConnector::new("not a url");
        let err = connector.connect("token").await.err().expect("error");
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[tokio::test]
    async fn refused_handshake_is_a_network_error() {
        // Port 9 (discard) is closed on test hosts.
        let connector = WebSocketConnector::new("ws://127.0.0.1:9/realtime");
        let err = connector.connect("token").await.err().expect("error");
        assert!(err.is_transient());
    }
}
