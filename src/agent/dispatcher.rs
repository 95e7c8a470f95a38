//! Dispatch engine: runs the first matching rule for one accepted message.
//!
//! A dispatch evaluates rules in order, runs the first match's executable
//! with the message text as its only argument, and replies with the captured
//! output followed by an exit-code marker line. Evaluation stops at the first
//! match whatever happens afterwards.
//!
//! Only a program that ran produces a result reply. A launch failure is
//! logged and the sender gets nothing back, the same as for a message that
//! matched no rule.
//!
//! A program that exits non-zero still ran, so its output and exit code are
//! replied like any other result. This is deliberate: a runner that treats a
//! non-zero exit as a failed run (Go's `CombinedOutput`, for one) would send
//! nothing for it.

use std::sync::Arc;

use crate::channels::Outbox;
use crate::pipeline::{DispatchContext, RuleSet};
use crate::process::CommandRunner;

/// How a single dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No rule matched. Nothing was run or sent.
    NoMatch,
    /// The rule's program ran and its result was queued for delivery.
    Completed { rule: usize, exit_code: i32 },
    /// The rule's program could not be launched or awaited. No result reply.
    ExecFailed { rule: usize },
}

/// Matches messages against the rule set and runs commands.
pub struct Dispatcher {
    rules: Arc<RuleSet>,
    runner: Arc<dyn CommandRunner>,
    outbox: Outbox,
    acknowledge: bool,
}

impl Dispatcher {
    pub fn new(rules: Arc<RuleSet>, runner: Arc<dyn CommandRunner>, outbox: Outbox) -> Self {
        Self {
            rules,
            runner,
            outbox,
            acknowledge: false,
        }
    }

    /// Send an acknowledgement reply before running a matched command.
    pub fn with_acknowledgement(mut self, acknowledge: bool) -> Self {
        self.acknowledge = acknowledge;
        self
    }

    /// Handle one accepted message end to end.
    pub async fn dispatch(&self, ctx: DispatchContext) -> DispatchOutcome {
        let seq = ctx.sequence_id;

        let Some((index, rule)) = self.rules.first_match(&ctx.text) else {
            tracing::debug!(seq, "No rule matched, dropping message");
            return DispatchOutcome::NoMatch;
        };

        tracing::info!(
            seq,
            sender = %ctx.sender,
            rule = index,
            pattern = %rule.pattern,
            executable = %rule.executable.display(),
            "Rule matched"
        );

        if self.acknowledge {
            let ack = format!("⏳ Running {}...", rule.executable.display());
            self.queue_reply(&ctx, ack);
        }

        let result = match self.runner.run(&rule.executable, &ctx.text).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(seq, sender = %ctx.sender, rule = index, "Command failed: {}", e);
                return DispatchOutcome::ExecFailed { rule: index };
            }
        };

        tracing::info!(seq, rule = index, exit_code = result.exit_code, "Command finished");

        self.queue_reply(&ctx, format_reply(&result.combined_output, result.exit_code));

        DispatchOutcome::Completed {
            rule: index,
            exit_code: result.exit_code,
        }
    }

    fn queue_reply(&self, ctx: &DispatchContext, text: String) {
        if let Err(e) = self.outbox.send(ctx.reply(text)) {
            tracing::error!(seq = ctx.sequence_id, "Could not queue reply: {}", e);
        }
    }
}

/// Compose the result reply: output, then the exit-code marker line.
pub fn format_reply(output: &[u8], exit_code: i32) -> String {
    format!(
        "{}\n---[Exit-code: {}]-------------\n",
        String::from_utf8_lossy(output),
        exit_code
    )
}
