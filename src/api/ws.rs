//! WebSocket transport for chat sessions
//!
//! The socket is split: a reader task forwards text frames into a channel of
//! capacity one and cancels the connection token when the peer goes away,
//! while the session writes fragments straight to the sink.

use crate::presenter::Fragment;
use crate::session::{Connection, TransportError};
use async_trait::async_trait;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct WsConnection<Tx> {
    outbound: Tx,
    inbound: mpsc::Receiver<Result<String, TransportError>>,
}

impl<Tx> WsConnection<Tx>
where
    Tx: Sink<Message> + Unpin + Send,
    Tx::Error: Display,
{
    /// Start reading from `inbound`; `cancel` fires once it ends
    pub fn new<Rx, E>(outbound: Tx, inbound: Rx, cancel: CancellationToken) -> (Self, JoinHandle<()>)
    where
        Rx: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(1);
        let reader = tokio::spawn(read_frames(inbound, tx, cancel));
        (
            Self {
                outbound,
                inbound: rx,
            },
            reader,
        )
    }

    pub async fn close(&mut self) {
        if let Err(e) = self.outbound.close().await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

enum Inbound {
    Text(String),
    Closed,
    Failed(String),
}

/// Next frame the session cares about; never consumes a text frame it doesn't return
async fn next_frame<Rx, E>(inbound: &mut Rx) -> Inbound
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Text(text)) => return Inbound::Text(text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => return Inbound::Text(text),
                Err(_) => tracing::debug!("Ignoring non-UTF-8 binary frame"),
            },
            // Pings are answered by the protocol layer
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => return Inbound::Closed,
            Err(e) => return Inbound::Failed(e.to_string()),
        }
    }
    Inbound::Closed
}

async fn read_frames<Rx, E>(
    mut inbound: Rx,
    tx: mpsc::Sender<Result<String, TransportError>>,
    cancel: CancellationToken,
) where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut pending: Option<String> = None;
    loop {
        let text = match pending.take() {
            Some(text) => text,
            None => match next_frame(&mut inbound).await {
                Inbound::Text(text) => text,
                Inbound::Closed => break,
                Inbound::Failed(e) => {
                    let _ = tx.send(Err(TransportError::Socket(e))).await;
                    break;
                }
            },
        };

        // While the session is busy, keep watching the socket so a disconnect
        // cancels the running turn. Frames still queued at that point are dropped.
        let permit = tokio::select! {
            biased;
            permit = tx.reserve() => permit,
            frame = next_frame(&mut inbound) => match frame {
                Inbound::Text(next) => {
                    pending = Some(next);
                    tx.reserve().await
                }
                Inbound::Closed => break,
                Inbound::Failed(e) => {
                    tracing::debug!(error = %e, "WebSocket failed during a turn");
                    break;
                }
            },
        };
        match permit {
            Ok(permit) => permit.send(Ok(text)),
            Err(_) => break,
        }
    }
    cancel.cancel();
}

#[async_trait]
impl<Tx> Connection for WsConnection<Tx>
where
    Tx: Sink<Message> + Unpin + Send,
    Tx::Error: Display,
{
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.inbound.recv().await {
            Some(Ok(text)) => Ok(Some(text)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn send(&mut self, fragment: &Fragment) -> Result<(), TransportError> {
        self.outbound
            .send(Message::Text(fragment.as_str().to_string()))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }
}
