use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::{
    Clock, ConsumeDecision, RateWindow, RateWindowStore, RedisKey, SubjectId, SystemClock,
    TaskgateError,
};

#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowCounter {
    pub consumed: u64,
    pub expires_at_ms: u64,
}

/// In-process [`RateWindowStore`].
///
/// Counters live in a [`DashMap`] keyed by `(window name, subject)`. The
/// whole consume runs under the entry's shard lock, so it is atomic per key
/// within this process. State is not shared across processes and does not
/// survive a restart; use the Redis store for that.
///
/// Expired counters are replaced lazily on the next consume. Subjects that
/// never come back stay in memory until [`cleanup`](Self::cleanup) runs,
/// either by hand or through [`run_cleanup_loop`](Self::run_cleanup_loop).
#[derive(Debug)]
pub struct LocalRateWindowStore {
    clock: Arc<dyn Clock>,
    counters: DashMap<(RedisKey, SubjectId), WindowCounter>,
}

impl Default for LocalRateWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRateWindowStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            counters: DashMap::new(),
        }
    }

    /// Synchronous consume; [`RateWindowStore::consume`] delegates here.
    pub fn consume_now(&self, window: &RateWindow, subject: &SubjectId) -> ConsumeDecision {
        let now_ms = self.clock.now_ms();
        let period_ms = *window.period();
        let points = *window.points();

        let mut counter = self
            .counters
            .entry((window.name().clone(), subject.clone()))
            .or_insert_with(|| WindowCounter {
                consumed: 0,
                expires_at_ms: now_ms.saturating_add(period_ms),
            });

        if counter.expires_at_ms <= now_ms {
            *counter = WindowCounter {
                consumed: 0,
                expires_at_ms: now_ms.saturating_add(period_ms),
            };
        }

        counter.consumed = counter.consumed.saturating_add(1);

        if counter.consumed <= points {
            return ConsumeDecision::Allowed {
                remaining_points: points - counter.consumed,
            };
        }

        // Only the consume that crosses the limit starts the block.
        if let Some(block_duration) = window.block_duration()
            && counter.consumed == points + 1
        {
            counter.expires_at_ms = now_ms.saturating_add(*block_duration);
        }

        ConsumeDecision::Denied {
            ms_before_next: counter.expires_at_ms.saturating_sub(now_ms),
        }
    } // end method consume_now

    /// Number of live or not-yet-evicted counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let before = self.counters.len();

        self.counters
            .retain(|_, counter| counter.expires_at_ms > now_ms);

        before.saturating_sub(self.counters.len())
    } // end method cleanup

    /// Run [`cleanup`](Self::cleanup) every `interval` on the current tokio
    /// runtime.
    ///
    /// The loop holds only a weak reference and exits once the store is
    /// dropped. Abort the returned handle to stop it earlier.
    pub fn run_cleanup_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            // discard the first tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(store) = store.upgrade() else {
                    break;
                };

                let removed = store.cleanup();
                if removed > 0 {
                    tracing::debug!(removed, "local window counters evicted");
                }
            }
        })
    } // end method run_cleanup_loop
}

#[async_trait]
impl RateWindowStore for LocalRateWindowStore {
    async fn consume(
        &self,
        window: &RateWindow,
        subject: &SubjectId,
    ) -> Result<ConsumeDecision, TaskgateError> {
        Ok(self.consume_now(window, subject))
    }
}
