//! Session loop: receives messages and hands them to dispatch tasks.
//!
//! The loop is the only consumer of the transport's event stream. It
//! receives strictly in delivery order, filters, assigns sequence ids and
//! spawns one dispatch task per accepted message without waiting for it.
//! Replies from different dispatches can therefore arrive out of order.
//!
//! Without a configured `dispatch.maxConcurrent` the number of in-flight
//! dispatches (and child processes) is unbounded.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use tokio::task::JoinSet;

use crate::agent::dispatcher::{DispatchOutcome, Dispatcher};
use crate::agent::limiter::DispatchLimiter;
use crate::channels::{Channel, Event, IncomingMessage, Outbox};
use crate::config::DispatchConfig;
use crate::error::Error;
use crate::logging::indent;
use crate::pipeline::{DispatchContext, RuleSet, SenderFilter};
use crate::process::CommandRunner;

/// Counters for one session, reported when the loop exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Chat messages received (any sender, any text).
    pub received: u64,
    /// Dropped for having no text.
    pub empty: u64,
    /// Dropped by the sender filter.
    pub rejected: u64,
    /// Handed to a dispatch task.
    pub dispatched: u64,
    /// Dropped because every dispatch slot was busy.
    pub overflowed: u64,
    /// Transport receive errors.
    pub receive_errors: u64,
    /// Presence and other non-chat events.
    pub ignored_events: u64,
}

/// Options for the session loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopOptions {
    pub acknowledge: bool,
    pub dispatch: DispatchConfig,
}

/// Why the loop stopped receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    StreamEnded,
    Interrupted,
}

/// The process-wide receive → filter → dispatch loop.
pub struct SessionLoop {
    channel: Arc<dyn Channel>,
    filter: SenderFilter,
    rules: Arc<RuleSet>,
    runner: Arc<dyn CommandRunner>,
    options: LoopOptions,
    next_sequence: AtomicU64,
}

impl SessionLoop {
    pub fn new(
        channel: Arc<dyn Channel>,
        filter: SenderFilter,
        rules: RuleSet,
        runner: Arc<dyn CommandRunner>,
        options: LoopOptions,
    ) -> Self {
        Self {
            channel,
            filter,
            rules: Arc::new(rules),
            runner,
            options,
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Connect and process messages until the transport closes or Ctrl+C.
    pub async fn run(self) -> Result<SessionStats, Error> {
        self.run_until(ctrl_c()).await
    }

    /// Connect and process messages until the transport closes or
    /// `shutdown` resolves.
    ///
    /// A connect failure is returned as an error. Receive errors are logged
    /// and never end the loop. When the stream ends, in-flight dispatches are
    /// awaited and queued replies flushed before returning. On shutdown
    /// in-flight dispatches are abandoned, including while the loop is
    /// waiting for a dispatch slot.
    pub async fn run_until<S>(self, shutdown: S) -> Result<SessionStats, Error>
    where
        S: Future<Output = ()>,
    {
        let mut events = self.channel.connect().await?;
        tokio::pin!(shutdown);

        let (outbox, writer) = Outbox::spawn(Arc::clone(&self.channel));
        let dispatcher = Arc::new(
            Dispatcher::new(Arc::clone(&self.rules), Arc::clone(&self.runner), outbox)
                .with_acknowledgement(self.options.acknowledge),
        );
        let limiter = DispatchLimiter::new(self.options.dispatch);
        let mut tasks: JoinSet<DispatchOutcome> = JoinSet::new();
        let mut stats = SessionStats::default();

        tracing::info!(
            channel = self.channel.name(),
            rules = self.rules.len(),
            contacts = self.filter.len(),
            "Listening for messages"
        );

        let exit = loop {
            let event = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested, stopping...");
                    break Exit::Interrupted;
                }
                event = events.next() => match event {
                    Some(event) => event,
                    None => {
                        tracing::info!("Event stream ended, shutting down...");
                        break Exit::StreamEnded;
                    }
                }
            };

            // Reap finished dispatches so the set does not grow unbounded
            while let Some(done) = tasks.try_join_next() {
                log_join(done);
            }

            let message = match event {
                Ok(Event::Chat(message)) => message,
                Ok(Event::Presence { .. } | Event::Other) => {
                    stats.ignored_events += 1;
                    continue;
                }
                Err(e) => {
                    stats.receive_errors += 1;
                    tracing::error!("Receive error: {}", e);
                    continue;
                }
            };

            stats.received += 1;
            let Some(ctx) = self.accept(message, &mut stats) else {
                continue;
            };

            let seq = ctx.sequence_id;
            let dispatcher = Arc::clone(&dispatcher);
            // Under the block policy this waits for a slot, so it must stay
            // interruptible.
            let launched = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(seq, "Shutdown requested while waiting for a dispatch slot");
                    break Exit::Interrupted;
                }
                launched = limiter.launch(&mut tasks, seq, async move {
                    dispatcher.dispatch(ctx).await
                }) => launched,
            };
            if launched {
                stats.dispatched += 1;
            } else {
                stats.overflowed += 1;
            }
        };

        match exit {
            Exit::StreamEnded => {
                while let Some(done) = tasks.join_next().await {
                    log_join(done);
                }
            }
            Exit::Interrupted => {
                if !tasks.is_empty() {
                    tracing::warn!(in_flight = tasks.len(), "Abandoning running dispatches");
                }
                tasks.shutdown().await;
            }
        }

        // Last outbox handle goes with the dispatcher; the writer then drains.
        drop(dispatcher);
        if let Err(e) = writer.await {
            tracing::error!("Outbox writer failed: {}", e);
        }

        if let Err(e) = self.channel.shutdown().await {
            tracing::warn!("Channel shutdown failed: {}", e);
        }

        tracing::info!(?stats, "Session finished");
        Ok(stats)
    }

    /// Apply the empty-text and sender checks, in that order, and assign a
    /// sequence id to messages that pass.
    fn accept(&self, message: IncomingMessage, stats: &mut SessionStats) -> Option<DispatchContext> {
        if message.text.is_empty() {
            stats.empty += 1;
            return None;
        }

        if !self.filter.allows(&message.sender) {
            stats.rejected += 1;
            tracing::info!(sender = %message.sender, "Ignoring message from unlisted sender");
            return None;
        }

        let seq = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            seq,
            sender = %message.sender,
            "Received message:\n{}",
            indent(&message.text, "<--- ")
        );
        Some(DispatchContext::new(seq, message))
    }
}

/// Resolves on Ctrl+C. If the handler cannot be installed the session runs
/// until its transport closes.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn log_join(done: Result<DispatchOutcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => tracing::debug!(?outcome, "Dispatch finished"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!("Dispatch task panicked: {}", e),
    }
}
