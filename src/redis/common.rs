use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use redis::{
    Client,
    aio::{ConnectionManager, ConnectionManagerConfig},
};

use crate::{RedisKey, SubjectId, TaskgateError};

/// A round-robin set of [`redis::aio::ConnectionManager`]s.
///
/// Each manager reconnects on its own. Cloning is cheap and shares the
/// managers.
#[derive(Clone)]
pub struct TaskgateRedisClient {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: Arc<AtomicUsize>,
}

impl std::fmt::Debug for TaskgateRedisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskgateRedisClient")
            .field("connection_managers", &self.connection_managers.len())
            .field("track_index", &self.track_index)
            .finish()
    }
}

impl TaskgateRedisClient {
    /// Create a client with a single connection and the redis crate's default
    /// timeouts.
    pub async fn default_from_client(client: Client) -> Result<Self, TaskgateError> {
        Self::from_client(client, 1, None).await
    }

    /// Create a client with `connection_count` managers.
    ///
    /// When `timeout` is set it bounds both connecting and every response, so
    /// no store call blocks indefinitely on a dead server.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
        timeout: Option<Duration>,
    ) -> Result<Self, TaskgateError> {
        if connection_count == 0 {
            return Err(TaskgateError::InvalidRedisClientConnectionCount(
                "connection count must be > 0".to_string(),
            ));
        }

        let mut config = ConnectionManagerConfig::new();
        if let Some(timeout) = timeout {
            config = config
                .set_connection_timeout(timeout)
                .set_response_timeout(timeout);
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            let connection_manager = client
                .get_connection_manager_with_config(config.clone())
                .await
                .map_err(|err| TaskgateError::StoreUnavailable(err.to_string()))?;

            connection_managers.push(connection_manager);
        }

        Ok(Self::from_connection_managers(connection_managers))
    }

    // callers guarantee at least one manager
    fn from_connection_managers(connection_managers: Vec<ConnectionManager>) -> Self {
        Self {
            connection_managers: Arc::new(connection_managers),
            track_index: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wrap a single existing manager.
    pub fn from_connection_manager(connection_manager: ConnectionManager) -> Self {
        Self::from_connection_managers(vec![connection_manager])
    }

    /// Get a [`redis::aio::ConnectionManager`] from the pool.
    pub(crate) fn get(&self) -> ConnectionManager {
        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    } // end method get
} // end impl TaskgateRedisClient

/// Builds every key this crate writes.
///
/// - windows: `{prefix}:{window}:{subject}`
/// - queues: `{prefix}:queue:{queue}:{suffix}`
#[derive(Clone, Debug)]
pub(crate) struct RedisKeyGenerator {
    pub prefix: RedisKey,
}

impl RedisKeyGenerator {
    pub(crate) fn new(prefix: RedisKey) -> Self {
        Self { prefix }
    }

    pub(crate) fn get_window_key(&self, window: &RedisKey, subject: &SubjectId) -> String {
        format!("{}:{}:{}", *self.prefix, **window, subject.as_str())
    }

    pub(crate) fn get_queue_key(&self, queue: &RedisKey, suffix: &str) -> String {
        format!("{}:queue:{}:{}", *self.prefix, **queue, suffix)
    }
}
