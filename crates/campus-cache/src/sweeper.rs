use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::cache::ResponseCache;

/// Background task that periodically drops expired cache entries.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
        info!("cache sweeper stopped");
    }
}

impl<V, E> ResponseCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Runs [`ResponseCache::cleanup`] every `period` until shut down or
    /// until every clone of the cache is dropped.
    pub fn spawn_sweeper(&self, period: Duration) -> SweeperHandle {
        let period = period.max(Duration::from_millis(1));
        let state = Arc::downgrade(&self.state);
        let shutdown = Arc::new(Notify::new());
        let shutdown_signal = Arc::clone(&shutdown);

        info!(period_ms = period.as_millis(), "cache sweeper started");

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_signal.notified() => break,

                    _ = ticker.tick() => {
                        let Some(state) = state.upgrade() else {
                            debug!("cache dropped, sweeper exiting");
                            break;
                        };
                        let removed = state.lock().cleanup(Instant::now());
                        debug!(removed, "cache sweep finished");
                    }
                }
            }
        });

        SweeperHandle { shutdown, handle }
    }
}
