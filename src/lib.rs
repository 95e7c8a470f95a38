//! Chat bridge: runs local programs in response to chat messages.
//!
//! Messages from allow-listed senders are matched against ordered regex
//! rules; the first match's executable runs with the message text as its
//! argument and its output is sent back to the sender.

pub mod agent;
pub mod channels;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod process;
