//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::hash::Hash;
use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::cache::{sweep, CacheEntry};

/// Owned handle to a running sweep task.
///
/// Dropping the handle cancels the task, so the sweeper lives exactly as
/// long as the store holding it.
#[derive(Debug)]
pub(crate) struct SweepHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }

    #[cfg(test)]
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Spawns the periodic sweep over `entries` on `runtime`.
///
/// The first sweep runs one `period` after spawning. The task holds only a
/// weak reference and exits once the map is gone or the token is cancelled;
/// cancellation is checked before every tick is acted on.
pub(crate) fn spawn_sweep_task<K, V>(
    runtime: &Handle,
    entries: Weak<DashMap<K, CacheEntry<V>>>,
    period: Duration,
) -> SweepHandle
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let task = runtime.spawn(async move {
        info!("Starting TTL sweep task with interval of {:?}", period);

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancelled.cancelled() => break,

                _ = ticker.tick() => {}
            }

            let Some(entries) = entries.upgrade() else {
                break;
            };
            let removed = sweep(&entries);
            drop(entries);

            if removed > 0 {
                debug!(removed, "TTL sweep removed expired entries");
            } else {
                trace!("TTL sweep: no expired entries found");
            }
        }

        info!("TTL sweep task stopped");
    });

    SweepHandle { token, task }
}
