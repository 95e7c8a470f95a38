//! Channel abstraction for message I/O.

pub mod channel;
pub mod cli;
pub mod outbox;
pub mod telegram;

pub use channel::*;
pub use cli::CliChannel;
pub use outbox::Outbox;
pub use telegram::TelegramChannel;
