//! Optional ceiling on concurrently running dispatches.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::agent::dispatcher::DispatchOutcome;
use crate::config::{DispatchConfig, OverflowPolicy};

/// Starts dispatch tasks, applying the configured concurrency limit.
#[derive(Debug, Clone)]
pub struct DispatchLimiter {
    slots: Option<Arc<Semaphore>>,
    overflow: OverflowPolicy,
}

impl DispatchLimiter {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            slots: config.max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
            overflow: config.overflow,
        }
    }

    /// Start `dispatch` on `tasks`.
    ///
    /// With the `block` policy this waits for a free slot, which holds up the
    /// caller's receive loop. Returns `false` if the dispatch was dropped.
    pub async fn launch<F>(
        &self,
        tasks: &mut JoinSet<DispatchOutcome>,
        seq: u64,
        dispatch: F,
    ) -> bool
    where
        F: Future<Output = DispatchOutcome> + Send + 'static,
    {
        let Some(slots) = self.slots.clone() else {
            tasks.spawn(dispatch);
            return true;
        };

        match self.overflow {
            OverflowPolicy::Block => {
                if slots.available_permits() == 0 {
                    tracing::info!(seq, "All dispatch slots busy, waiting");
                }
                let Ok(permit) = slots.acquire_owned().await else {
                    return false;
                };
                tasks.spawn(async move {
                    let _permit = permit;
                    dispatch.await
                });
            }
            OverflowPolicy::Queue => {
                tasks.spawn(async move {
                    let _permit = slots.acquire_owned().await;
                    dispatch.await
                });
            }
            OverflowPolicy::Drop => {
                let Ok(permit) = slots.try_acquire_owned() else {
                    tracing::warn!(seq, "All dispatch slots busy, dropping message");
                    return false;
                };
                tasks.spawn(async move {
                    let _permit = permit;
                    dispatch.await
                });
            }
        }
        true
    }
}
