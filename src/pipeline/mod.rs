//! Message routing pipeline.
//!
//! Every chat message from the transport flows through:
//! 1. `SenderFilter::allows()`: sender allow-list (regex search)
//! 2. `RuleSet::first_match()`: ordered rules, first match wins
//! 3. `Dispatcher::dispatch()`: run the rule's executable, reply with output
//!
//! Unmatched messages are dropped without a reply.

pub mod filter;
pub mod rules;
pub mod types;

pub use filter::SenderFilter;
pub use rules::{Rule, RuleSet};
pub use types::DispatchContext;
