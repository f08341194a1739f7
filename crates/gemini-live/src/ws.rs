//! WebSocket transport backed by tokio-tungstenite.
//!
//! `connect` splits the socket and spawns one pump per direction, exposing
//! the connection as the channel pair the session driver consumes. The
//! endpoint mixes text and binary frames for the same JSON payloads, so both
//! are decoded.

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::client::{Connect, TransportCmd, TransportEvent, TransportHandle};

const WRITE_QUEUE_CAPACITY: usize = 256;
const READ_QUEUE_CAPACITY: usize = 256;

pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait::async_trait]
impl Connect for WsConnector {
    async fn connect(&self) -> anyhow::Result<TransportHandle> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .context("websocket handshake failed")?;
        tracing::debug!(status = %response.status(), "websocket open");

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<TransportCmd>(WRITE_QUEUE_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(READ_QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(cmd) = outbound_rx.recv().await {
                let result = match cmd {
                    TransportCmd::Frame(text) => write.send(Message::Text(text.into())).await,
                    TransportCmd::Close => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::warn!(error = %e, "websocket write failed");
                    break;
                }
            }
            // Sender dropped without an explicit close; flush the handshake.
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(item) = read.next().await {
                let event = match item {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text.to_string()),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(e) => {
                            tracing::warn!(error = %e, "non-utf8 binary frame dropped");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let clean = frame
                            .as_ref()
                            .map(|f| f.code == CloseCode::Normal)
                            .unwrap_or(false);
                        tracing::info!(?frame, clean, "websocket closed by peer");
                        let _ = inbound_tx.send(TransportEvent::Closed { clean }).await;
                        return;
                    }
                    Ok(_) => continue, // ping/pong handled by the library
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read failed");
                        let _ = inbound_tx
                            .send(TransportEvent::Closed { clean: false })
                            .await;
                        return;
                    }
                };
                if inbound_tx.send(event).await.is_err() {
                    return;
                }
            }
            // Stream ended without a close frame.
            let _ = inbound_tx
                .send(TransportEvent::Closed { clean: false })
                .await;
        });

        Ok(TransportHandle {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
