//! WebSocket push-channel transport.
//!
//! Accepts TCP connections, upgrades them and drives a
//! [`ConnectionHandler`]. Each connection gets a writer task fed by a
//! bounded channel; the channel sender is the client's [`ClientSink`], so a
//! slow socket backs up its own queue and nothing else.
//!
//! # Wire format
//!
//! Inbound text frames are `{"action", "symbols"}` requests. Outbound frames
//! are either push messages (`{"symbol", "data", "timestamp"}`) or an error
//! frame `{"error", "retryable"}` answering a rejected request.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::domain::ClientId;
use crate::error::{Error, Result};
use crate::port::{ClientSink, ConnectionHandler, PushMessage};

/// Outbound frames buffered per connection before sends start failing.
const OUTBOUND_QUEUE: usize = 256;

/// [`ClientSink`] feeding a connection's writer task.
struct ChannelSink {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl ClientSink for ChannelSink {
    async fn send(&self, message: &PushMessage) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|_| Error::Send("connection closed".into()))
    }
}

fn error_frame(err: &Error) -> Message {
    Message::Text(
        json!({
            "error": err.to_string(),
            "retryable": err.is_retryable(),
        })
        .to_string(),
    )
}

pub struct WebSocketServer {
    listener: TcpListener,
    handler: Arc<dyn ConnectionHandler>,
}

impl WebSocketServer {
    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the address cannot be bound.
    pub async fn bind(addr: &str, handler: Arc<dyn ConnectionHandler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, handler })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(addr = ?self.listener.local_addr().ok(), "Push channel listening");
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, peer, handler, shutdown).await {
                                debug!(peer = %peer, error = %e, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                _ = shutdown.changed() => break,
            }
        }
        info!("Push channel stopped");
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut write, mut read) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if write.send(message).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    let client = ClientId::generate();
    debug!(client = %client, peer = %peer, "Upgraded connection");
    handler
        .on_connect(client.clone(), Arc::new(ChannelSink { tx: tx.clone() }))
        .await;

    let result = loop {
        let frame = tokio::select! {
            frame = read.next() => frame,
            _ = shutdown.changed() => break Ok(()),
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = handler.on_message(&client, &text).await {
                    if tx.send(error_frame(&e)).await.is_err() {
                        break Ok(());
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => break Ok(()),
            Some(Ok(_)) => {}
            Some(Err(e)) => break Err(e.into()),
        }
    };

    handler.on_close(&client).await;
    drop(tx);
    let _ = writer.await;
    result
}
