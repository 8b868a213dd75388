//! WebSocket relay transport
//!
//! Optional ready-made [`RelayTransport`] for hosts whose room relay is a
//! WebSocket endpoint speaking one JSON object per text frame, in the
//! [`RelayFrame`] shape. Outbound frames never claim a sender; the relay
//! stamps the sender's transport id before fanning out.

use super::events::RelayFrame;
use super::relay::RelayTransport;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// [`RelayTransport`] over a WebSocket connection.
pub struct WsRelayTransport {
    tx: mpsc::UnboundedSender<Message>,
}

impl WsRelayTransport {
    /// Connect to the relay endpoint.
    ///
    /// Returns the transport for publishing plus the stream of inbound
    /// frames to feed the voice session. The connection runs on two
    /// background tasks that end when the socket closes or the frame
    /// receiver is dropped.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<RelayFrame>)> {
        info!(url, "connecting to relay");
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Signaling(format!("failed to connect to {}: {}", url, e)))?;

        let (write, read) = ws_stream.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(64);

        tokio::spawn(Self::sender_task(write, rx));
        tokio::spawn(Self::receiver_task(read, frames_tx));

        Ok((Self { tx }, frames_rx))
    }

    async fn sender_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut rx: mpsc::UnboundedReceiver<Message>,
    ) {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!("failed to send relay frame: {}", e);
                break;
            }
        }
        debug!("relay sender task terminated");
    }

    async fn receiver_task(
        mut read: futures::stream::SplitStream<WsStream>,
        frames: mpsc::Sender<RelayFrame>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(frame) => {
                        if frames.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("dropping undecodable relay frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("relay connection closed");
                    break;
                }
                Err(e) => {
                    error!("relay connection error: {}", e);
                    break;
                }
                _ => {}
            }
        }
        debug!("relay receiver task terminated");
    }
}

#[async_trait]
impl RelayTransport for WsRelayTransport {
    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<()> {
        let frame = RelayFrame {
            event: event.to_string(),
            sender: None,
            payload,
        };
        let json = serde_json::to_string(&frame)
            .map_err(|e| Error::Signaling(format!("failed to encode relay frame: {}", e)))?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| Error::Signaling("relay connection is gone".to_string()))?;
        Ok(())
    }
}
