/// Error type for this crate.
///
/// Rate-limit denial is not an error: it is reported as
/// [`ConsumeDecision::Denied`](crate::ConsumeDecision::Denied) and
/// [`Admission`](crate::Admission) rejections. Everything here is an
/// infrastructure or validation failure.
#[derive(Debug, thiserror::Error)]
pub enum TaskgateError {
    /// The rate window store could not be reached or returned garbage.
    #[error("rate window store unavailable: {0}")]
    StoreUnavailable(String),

    /// A window consume failed inside the admission controller.
    #[error("admission unavailable ({window}): {source}")]
    AdmissionUnavailable {
        /// Name of the window whose store call failed.
        window: String,
        /// The underlying store failure.
        #[source]
        source: Box<TaskgateError>,
    },

    /// A task queue operation failed.
    #[error("task queue unavailable: {0}")]
    QueueUnavailable(String),

    /// Invalid Redis key or key segment.
    #[error("invalid redis key: {0}")]
    InvalidRedisKey(String),

    /// Invalid connection count for a Redis client pool.
    #[error("invalid redis client connection count: {0}")]
    InvalidRedisClientConnectionCount(String),

    /// Invalid rate window configuration.
    #[error("invalid rate window: {0}")]
    InvalidRateWindow(String),

    /// Invalid subject identifier.
    #[error("invalid subject id: {0}")]
    InvalidSubject(String),

    /// A task record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TaskgateError {
    /// Whether this error came from shared infrastructure (store or queue)
    /// rather than from caller input.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            TaskgateError::StoreUnavailable(_)
                | TaskgateError::AdmissionUnavailable { .. }
                | TaskgateError::QueueUnavailable(_)
        )
    }
}
