//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens a [`TransportLink`]: a pair of channels carrying text
//! frames out and [`TransportEvent`]s in. The production connector bridges
//! those channels to a tokio-tungstenite stream with a reader and a writer task.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open connection to {url}: {reason}")]
    Open { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed { reason: Option<String> },
}

/// An open transport. Dropping `outbound` asks the transport to close.
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl TransportLink {
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &str) -> Result<TransportLink, TransportError> {
        let (ws_stream, _response) = connect_async(url).await.map_err(|e| TransportError::Open {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        info!("WebSocket connected to {}", url);

        let (mut write, mut read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        // Reader: forwards text frames until the peer closes or the stream errors
        let reader_tx = inbound_tx.clone();
        let reader = tokio::spawn(async move {
            let mut reason = None;
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if reader_tx.send(TransportEvent::Text(text.as_str().to_owned())).is_err() {
                            return;
                        }
                    }
                    Ok(WsMessage::Close(close)) => {
                        debug!("Received close frame: {:?}", close);
                        reason = close.map(|c| c.reason.as_str().to_owned());
                        break;
                    }
                    Ok(_) => {
                        // Binary, ping and pong frames carry nothing for us
                    }
                    Err(e) => {
                        error!("WebSocket read error: {}", e);
                        reason = Some(e.to_string());
                        break;
                    }
                }
            }
            let _ = reader_tx.send(TransportEvent::Closed { reason });
        });

        // Writer: sends queued frames, closes the socket once the sender is dropped
        tokio::spawn(async move {
            while let Some(text) = outbound_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Text(text.into())).await {
                    warn!("WebSocket send failed: {}", e);
                    let _ = inbound_tx.send(TransportEvent::Closed { reason: Some(e.to_string()) });
                    reader.abort();
                    return;
                }
            }
            debug!("Outbound channel dropped, closing WebSocket");
            if let Err(e) = write.close().await {
                debug!("Error closing WebSocket: {}", e);
            }
            // The peer may never answer our close frame; the read half holds the socket until it does
            reader.abort();
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
