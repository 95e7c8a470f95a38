//! CLI channel: stdin/stdout transport for local testing.
//!
//! Every non-empty input line is a chat message from a fixed local sender,
//! so that sender still has to be admitted by the contact patterns.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, Event, EventStream, IncomingMessage, OutgoingMessage};
use crate::error::ChannelError;

/// Sender identity used when none is configured.
pub const DEFAULT_CLI_SENDER: &str = "local-user";

/// A simple CLI channel that reads from stdin and writes to stdout.
pub struct CliChannel {
    sender: String,
}

impl CliChannel {
    pub fn new(sender: &str) -> Self {
        let sender = if sender.is_empty() {
            DEFAULT_CLI_SENDER
        } else {
            sender
        };
        Self {
            sender: sender.to_string(),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CLI_SENDER)
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn connect(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = line_event(&sender, line) else {
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(Ok(event)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF
                    Err(e) => {
                        let err = ChannelError::ReceiveFailed {
                            name: "cli".into(),
                            reason: e.to_string(),
                        };
                        if tx.send(Err(err)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
        println!("\n{}", message.text);
        eprint!("> ");
        Ok(())
    }
}

/// A chat event for one input line. Blank lines produce nothing; any other
/// line is passed on exactly as typed.
fn line_event(sender: &str, line: String) -> Option<Event> {
    if line.trim().is_empty() {
        return None;
    }
    Some(Event::Chat(IncomingMessage::new(sender, line)))
}
