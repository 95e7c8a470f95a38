//! Shared types for the dispatch pipeline.

use crate::channels::{IncomingMessage, OutgoingMessage};

/// Per-dispatch state handed from the session loop to a dispatch task.
///
/// The sequence id only correlates log lines of concurrently running
/// dispatches. It never influences matching or execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchContext {
    /// Monotonically increasing id assigned by the session loop.
    pub sequence_id: u64,
    /// Sender identity the message was accepted under.
    pub sender: String,
    /// Transport address replies are delivered to.
    pub address: String,
    /// Full message text.
    pub text: String,
}

impl DispatchContext {
    pub fn new(sequence_id: u64, message: IncomingMessage) -> Self {
        Self {
            sequence_id,
            sender: message.sender,
            address: message.address,
            text: message.text,
        }
    }

    /// Build a reply addressed back to the originating sender.
    pub fn reply(&self, text: impl Into<String>) -> OutgoingMessage {
        OutgoingMessage {
            recipient: self.address.clone(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_takes_fields_from_message() {
        let msg = IncomingMessage::new("alice@example.com", "ping").with_address("chat-42");
        let ctx = DispatchContext::new(7, msg);
        assert_eq!(ctx.sequence_id, 7);
        assert_eq!(ctx.sender, "alice@example.com");
        assert_eq!(ctx.address, "chat-42");
        assert_eq!(ctx.text, "ping");
    }

    #[test]
    fn reply_goes_to_message_address() {
        let msg = IncomingMessage::new("alice", "ping").with_address("99887766");
        let ctx = DispatchContext::new(1, msg);
        let reply = ctx.reply("pong");
        assert_eq!(reply.recipient, "99887766");
        assert_eq!(reply.text, "pong");
    }
}
