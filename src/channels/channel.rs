//! Transport abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;

/// A chat message received from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Sender identity matched against the contact allow-list.
    pub sender: String,
    /// Transport address replies are sent to (chat id, JID, ...).
    pub address: String,
    /// Message body.
    pub text: String,
}

impl IncomingMessage {
    /// Create a message whose reply address is the sender itself.
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        let sender = sender.into();
        Self {
            address: sender.clone(),
            sender,
            text: text.into(),
        }
    }

    /// Override the reply address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }
}

/// A reply to deliver through a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub recipient: String,
    pub text: String,
}

/// One inbound event from a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A chat message.
    Chat(IncomingMessage),
    /// Presence or membership change. Never dispatched.
    Presence { from: String },
    /// Anything else the transport delivers.
    Other,
}

/// Stream of inbound events. Receive failures are yielded as `Err` items
/// and do not end the stream; the stream ends when the session closes.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, ChannelError>> + Send>>;

/// A messaging transport.
///
/// `connect` is called once; `send` may be called from the outbox writer
/// while the session loop is consuming the event stream.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Establish and authenticate a session, returning its event stream.
    async fn connect(&self) -> Result<EventStream, ChannelError>;

    /// Deliver one message.
    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError>;

    /// Gracefully close the session.
    async fn shutdown(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
