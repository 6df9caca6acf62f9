//! Top-level entrypoint that wires backend implementations.
//!
//! The crate ships two backends, `local` and `redis`, exposed via
//! [`Stores::local`] and [`Stores::redis`]. Everything downstream (admission,
//! intake, workers) only sees the trait objects, so the choice is made once
//! at startup.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;

use crate::{
    Clock, LocalRateWindowStore, LocalTaskQueue, RateWindowStore, SystemClock, TaskQueue,
};

#[cfg(feature = "redis")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
use crate::{RedisKey, RedisRateWindowStore, RedisTaskQueue, TaskgateRedisClient};

/// The two shared stores every component is built from.
#[derive(Clone)]
pub struct Stores {
    /// Window counters.
    pub windows: Arc<dyn RateWindowStore>,
    /// Pending task records.
    pub queue: Arc<dyn TaskQueue>,
    local_windows: Option<Arc<LocalRateWindowStore>>,
}

impl Stores {
    /// In-process stores on the system clock.
    pub fn local() -> Self {
        Self::local_with_clock(Arc::new(SystemClock))
    }

    /// In-process stores sharing `clock`.
    pub fn local_with_clock(clock: Arc<dyn Clock>) -> Self {
        let windows = Arc::new(LocalRateWindowStore::with_clock(clock.clone()));

        Self {
            windows: windows.clone(),
            queue: Arc::new(LocalTaskQueue::with_clock(clock)),
            local_windows: Some(windows),
        }
    }

    /// Redis stores sharing one connection pool.
    #[cfg(feature = "redis")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis")))]
    pub fn redis(
        client: TaskgateRedisClient,
        prefix: Option<RedisKey>,
        queue_name: RedisKey,
    ) -> Self {
        Self {
            windows: Arc::new(RedisRateWindowStore::new(client.clone(), prefix.clone())),
            queue: Arc::new(RedisTaskQueue::new(client, prefix, queue_name)),
            local_windows: None,
        }
    }

    /// Start evicting expired window counters every `interval`.
    ///
    /// Only the local backend keeps counters in process; Redis expires its
    /// keys itself, so this returns `None` there.
    pub fn run_cleanup_loop(&self, interval: Duration) -> Option<JoinHandle<()>> {
        self.local_windows
            .as_ref()
            .map(|windows| windows.run_cleanup_loop(interval))
    }
}
