//! Single-writer reply queue.
//!
//! Dispatch tasks never touch the transport directly. They push replies into
//! an unbounded queue drained by one writer task, so wire writes are never
//! interleaved and a slow send never blocks a dispatch. Replies from one
//! dispatch are delivered in the order they were queued.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channels::{Channel, OutgoingMessage};
use crate::error::ChannelError;
use crate::logging::indent;

/// Handle for queueing replies. Cheap to clone.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutgoingMessage>,
    channel_name: String,
}

impl Outbox {
    /// Spawn the writer task for `channel`.
    ///
    /// The writer exits once every `Outbox` clone is dropped and the queue is
    /// drained; await the returned handle to flush pending replies.
    pub fn spawn(channel: Arc<dyn Channel>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutgoingMessage>();
        let channel_name = channel.name().to_string();

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let recipient = message.recipient.clone();
                let preview = indent(&message.text, "---> ");
                match channel.send(message).await {
                    Ok(()) => {
                        tracing::info!(recipient = %recipient, "Sent reply:\n{}", preview);
                    }
                    Err(e) => {
                        tracing::error!(recipient = %recipient, "Failed to send reply: {}", e);
                    }
                }
            }
            tracing::debug!(channel = channel.name(), "Outbox writer finished");
        });

        (Self { tx, channel_name }, handle)
    }

    /// Queue a reply for delivery.
    pub fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.tx.send(message).map_err(|_| ChannelError::Disconnected {
            name: self.channel_name.clone(),
        })
    }
}
