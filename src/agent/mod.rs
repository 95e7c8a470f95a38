//! Agent module: the session loop and the dispatch engine it drives.

pub mod agent_loop;
pub mod dispatcher;
pub mod limiter;

pub use agent_loop::{LoopOptions, SessionLoop, SessionStats};
pub use dispatcher::{DispatchOutcome, Dispatcher, format_reply};
pub use limiter::DispatchLimiter;
