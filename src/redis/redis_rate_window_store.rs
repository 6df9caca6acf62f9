use async_trait::async_trait;

use crate::{
    ConsumeDecision, RateWindow, RateWindowStore, RedisKey, SubjectId, TaskgateError,
    redis::{RedisKeyGenerator, TaskgateRedisClient},
};

const CONSUME_SCRIPT: &str = r#"
    local key = KEYS[1]

    local points = tonumber(ARGV[1])
    local period_ms = tonumber(ARGV[2])
    local block_ms = tonumber(ARGV[3])

    redis.call("SET", key, 0, "PX", period_ms, "NX")

    local consumed = redis.call("INCR", key)
    local ttl_ms = redis.call("PTTL", key)

    if ttl_ms < 0 then
        redis.call("PEXPIRE", key, period_ms)
        ttl_ms = period_ms
    end

    if consumed <= points then
        return {1, points - consumed}
    end

    if block_ms > 0 and consumed == points + 1 then
        redis.call("PEXPIRE", key, block_ms)
        ttl_ms = block_ms
    end

    return {0, ttl_ms}
"#;

/// [`RateWindowStore`] backed by Redis.
///
/// Each `(window, subject)` counter is one string key,
/// `{prefix}:{window}:{subject}`, whose TTL is the window period (or the
/// block duration once the subject goes over). The whole consume is a single
/// Lua script, so it is atomic across every process sharing the server and
/// counters survive intake restarts.
///
/// # Requirements
///
/// - **Redis version:** >= 2.6.12 (`SET ... PX ... NX`)
pub struct RedisRateWindowStore {
    client: TaskgateRedisClient,
    key_generator: RedisKeyGenerator,
    script: redis::Script,
}

impl RedisRateWindowStore {
    /// Create a store. A `None` prefix defaults to `"taskgate"`.
    pub fn new(client: TaskgateRedisClient, prefix: Option<RedisKey>) -> Self {
        let prefix = prefix.unwrap_or_else(RedisKey::default_prefix);

        Self {
            client,
            key_generator: RedisKeyGenerator::new(prefix),
            script: redis::Script::new(CONSUME_SCRIPT),
        }
    }

    pub(crate) fn key_for(&self, window: &RateWindow, subject: &SubjectId) -> String {
        self.key_generator.get_window_key(window.name(), subject)
    }
}

#[async_trait]
impl RateWindowStore for RedisRateWindowStore {
    async fn consume(
        &self,
        window: &RateWindow,
        subject: &SubjectId,
    ) -> Result<ConsumeDecision, TaskgateError> {
        let mut connection_manager = self.client.get();
        let block_ms = window.block_duration().map(|b| *b).unwrap_or(0);

        let (allowed, value): (i64, i64) = self
            .script
            .key(self.key_for(window, subject))
            .arg(*window.points())
            .arg(*window.period())
            .arg(block_ms)
            .invoke_async(&mut connection_manager)
            .await
            .map_err(|err| {
                tracing::error!(error = ?err, window = %window.name(), "redis.consume.error");
                TaskgateError::StoreUnavailable(err.to_string())
            })?;

        let value = u64::try_from(value).unwrap_or(0);

        match allowed {
            1 => Ok(ConsumeDecision::Allowed {
                remaining_points: value,
            }),
            0 => Ok(ConsumeDecision::Denied {
                ms_before_next: value,
            }),
            other => Err(TaskgateError::StoreUnavailable(format!(
                "unexpected result from consume script: {other}"
            ))),
        }
    } // end method consume
}
