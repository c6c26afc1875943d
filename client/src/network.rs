//! WebSocket transport.
//!
//! A connected socket is split into a writer task and a reader task. The
//! proxy talks to both through channels, so it never awaits socket I/O
//! directly and a [`Transport`] can be built from plain channels in tests.

use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// What the reader and writer tasks report back.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(String),
    Closed,
    Error(String),
    /// The writer gave up. `frames` holds the frame that failed followed by
    /// everything still queued behind it, in send order.
    SendFailed {
        frames: Vec<String>,
        reason: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("timed out connecting to {0}")]
    Timeout(String),
    #[error("transport is closed")]
    Closed,
}

pub struct Transport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    /// Opens a WebSocket to `url`, giving up after `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let (ws_stream, _) = match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => return Err(TransportError::Timeout(url.to_string())),
        };
        debug!("WebSocket handshake with {} complete", url);

        let (sink, mut source) = ws_stream.split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        tokio::spawn(write_frames(sink, outbound_rx, inbound_tx.clone()));

        tokio::spawn(async move {
            loop {
                let event = match source.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                    Some(Ok(Message::Close(_))) | None => TransportEvent::Closed,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => TransportEvent::Error(e.to_string()),
                };
                let last = !matches!(event, TransportEvent::Message(_));
                if inbound_tx.send(event).is_err() || last {
                    break;
                }
            }
        });

        Ok(Self { outbound, inbound })
    }

    /// A transport backed by caller-owned channels.
    pub fn from_channels(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queues one text frame. Fails once the writer side has gone away.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Closed)
    }

    /// Next event from the socket. A vanished reader reads as `Closed`.
    pub async fn recv(&mut self) -> TransportEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => {
                warn!("Transport reader stopped without a close frame");
                TransportEvent::Closed
            }
        }
    }
}

async fn write_frames<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<TransportEvent>,
) where
    S: Sink<Message, Error = WsError> + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = sink.send(Message::Text(frame.clone())).await {
            // Already accepted by `Transport::send`, so hand them all back.
            let mut frames = vec![frame];
            while let Ok(queued) = outbound.try_recv() {
                frames.push(queued);
            }
            let _ = events.send(TransportEvent::SendFailed {
                frames,
                reason: e.to_string(),
            });
            return;
        }
    }
    // Transport dropped by its owner.
    let _ = sink.close().await;
}
