use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    ClaimedTask, Clock, QueueStats, RedisKey, SystemClock, TaskQueue, TaskRecord, TaskgateError,
    redis::{RedisKeyGenerator, TaskgateRedisClient},
};

/// Maximum expired leases and due delayed records moved per claim.
pub const DEFAULT_PROMOTE_BATCH: u64 = 100;

// Ready members are `{seq:020}:{id}` scored by `enqueuedAtMs`, so equal
// scores fall back to lexicographic member order, which is arrival order.
const READY_MEMBER_LUA: &str = r#"
    local function ready_member(seq, id)
        return string.format("%020.0f", seq) .. ":" .. id
    end

    local function ready_id(member)
        return string.sub(member, 22)
    end
"#;

const ENQUEUE_SCRIPT: &str = r#"
    local records_key = KEYS[1]
    local ready_key = KEYS[2]
    local delayed_key = KEYS[3]

    local id = ARGV[1]
    local record = ARGV[2]
    local enqueued_at_ms = tonumber(ARGV[3])
    local seq = tonumber(ARGV[4])
    local not_before_ms = tonumber(ARGV[5])
    local now_ms = tonumber(ARGV[6])

    redis.call("HSET", records_key, id, record)

    if not_before_ms > now_ms then
        redis.call("ZADD", delayed_key, not_before_ms, id)
    else
        redis.call("ZADD", ready_key, enqueued_at_ms, ready_member(seq, id))
    end

    return 1
"#;

const CLAIM_SCRIPT: &str = r#"
    local records_key = KEYS[1]
    local attempts_key = KEYS[2]
    local leases_key = KEYS[3]
    local ready_key = KEYS[4]
    local delayed_key = KEYS[5]
    local inflight_key = KEYS[6]

    local now_ms = tonumber(ARGV[1])
    local lease_ms = tonumber(ARGV[2])
    local lease_token = ARGV[3]
    local batch = tonumber(ARGV[4])

    local function make_ready(id)
        local record = redis.call("HGET", records_key, id)
        if record then
            local decoded = cjson.decode(record)
            local member = ready_member(decoded["seq"] or 0, id)
            redis.call("ZADD", ready_key, decoded["enqueuedAtMs"], member)
        end
    end

    local expired = redis.call("ZRANGE", inflight_key, "-inf", now_ms, "BYSCORE", "LIMIT", 0, batch)

    for i = 1, #expired do
        local id = expired[i]
        redis.call("ZREM", inflight_key, id)
        redis.call("HDEL", leases_key, id)
        make_ready(id)
    end

    local due = redis.call("ZRANGE", delayed_key, "-inf", now_ms, "BYSCORE", "LIMIT", 0, batch)

    for i = 1, #due do
        local id = due[i]
        redis.call("ZREM", delayed_key, id)
        make_ready(id)
    end

    local head = redis.call("ZPOPMIN", ready_key)
    if #head == 0 then
        return false
    end

    local id = ready_id(head[1])
    local record = redis.call("HGET", records_key, id)
    if not record then
        return false
    end

    local attempt = redis.call("HINCRBY", attempts_key, id, 1)
    local expires_at_ms = now_ms + lease_ms

    redis.call("HSET", leases_key, id, lease_token)
    redis.call("ZADD", inflight_key, expires_at_ms, id)

    return {record, attempt, expires_at_ms}
"#;

const ACK_SCRIPT: &str = r#"
    local records_key = KEYS[1]
    local attempts_key = KEYS[2]
    local leases_key = KEYS[3]
    local inflight_key = KEYS[4]

    local id = ARGV[1]
    local lease_token = ARGV[2]

    if redis.call("HGET", leases_key, id) ~= lease_token then
        return 0
    end

    redis.call("HDEL", leases_key, id)
    redis.call("ZREM", inflight_key, id)
    redis.call("HDEL", records_key, id)
    redis.call("HDEL", attempts_key, id)

    return 1
"#;

const RELEASE_SCRIPT: &str = r#"
    local records_key = KEYS[1]
    local leases_key = KEYS[2]
    local ready_key = KEYS[3]
    local delayed_key = KEYS[4]
    local inflight_key = KEYS[5]

    local id = ARGV[1]
    local lease_token = ARGV[2]
    local record = ARGV[3]
    local enqueued_at_ms = tonumber(ARGV[4])
    local seq = tonumber(ARGV[5])
    local not_before_ms = tonumber(ARGV[6])
    local now_ms = tonumber(ARGV[7])

    if redis.call("HGET", leases_key, id) ~= lease_token then
        return 0
    end

    redis.call("HDEL", leases_key, id)
    redis.call("ZREM", inflight_key, id)
    redis.call("HSET", records_key, id, record)

    if not_before_ms > now_ms then
        redis.call("ZADD", delayed_key, not_before_ms, id)
    else
        redis.call("ZADD", ready_key, enqueued_at_ms, ready_member(seq, id))
    end

    return 1
"#;

fn with_ready_member(script: &str) -> redis::Script {
    redis::Script::new(&format!("{READY_MEMBER_LUA}{script}"))
}

#[derive(Debug, Clone)]
struct QueueKeys {
    seq: String,
    records: String,
    attempts: String,
    leases: String,
    ready: String,
    delayed: String,
    inflight: String,
}

impl QueueKeys {
    fn new(key_generator: &RedisKeyGenerator, name: &RedisKey) -> Self {
        Self {
            seq: key_generator.get_queue_key(name, "seq"),
            records: key_generator.get_queue_key(name, "records"),
            attempts: key_generator.get_queue_key(name, "attempts"),
            leases: key_generator.get_queue_key(name, "leases"),
            ready: key_generator.get_queue_key(name, "ready"),
            delayed: key_generator.get_queue_key(name, "delayed"),
            inflight: key_generator.get_queue_key(name, "inflight"),
        }
    }
}

/// [`TaskQueue`] backed by Redis.
///
/// # Data model
///
/// Under `{prefix}:queue:{name}:`
///
/// - `seq` (string): enqueue counter, `INCR`ed once per enqueue
/// - `records` (hash): task id → record JSON
/// - `attempts` (hash): task id → delivery count
/// - `leases` (hash): task id → current lease token
/// - `ready` (zset): eligible `{seq:020}:{id}` members scored by `enqueuedAtMs`
/// - `delayed` (zset): ids scored by `notBeforeMs`
/// - `inflight` (zset): leased ids scored by lease expiry
///
/// Every transition is one Lua script, so a record is handed to at most one
/// claimant per claim cycle no matter how many workers or processes poll.
///
/// Timestamps come from the injected [`Clock`] of whoever enqueues or
/// claims; workers on different hosts should keep their clocks in sync.
///
/// # Requirements
///
/// - **Redis version:** >= 6.2.0 (`ZRANGE ... BYSCORE`)
pub struct RedisTaskQueue {
    client: TaskgateRedisClient,
    clock: Arc<dyn Clock>,
    keys: QueueKeys,
    promote_batch: u64,
    enqueue_script: redis::Script,
    claim_script: redis::Script,
    ack_script: redis::Script,
    release_script: redis::Script,
}

impl RedisTaskQueue {
    /// Create a queue named `name`. A `None` prefix defaults to `"taskgate"`.
    pub fn new(client: TaskgateRedisClient, prefix: Option<RedisKey>, name: RedisKey) -> Self {
        Self::with_clock(client, prefix, name, Arc::new(SystemClock))
    }

    /// Create a queue on a custom clock.
    pub fn with_clock(
        client: TaskgateRedisClient,
        prefix: Option<RedisKey>,
        name: RedisKey,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prefix = prefix.unwrap_or_else(RedisKey::default_prefix);
        let key_generator = RedisKeyGenerator::new(prefix);

        Self {
            client,
            clock,
            keys: QueueKeys::new(&key_generator, &name),
            promote_batch: DEFAULT_PROMOTE_BATCH,
            enqueue_script: with_ready_member(ENQUEUE_SCRIPT),
            claim_script: with_ready_member(CLAIM_SCRIPT),
            ack_script: redis::Script::new(ACK_SCRIPT),
            release_script: with_ready_member(RELEASE_SCRIPT),
        }
    }

    /// Bound how many expired leases and due delayed records a single claim
    /// moves. Values below 1 are raised to 1.
    pub fn with_promote_batch(mut self, promote_batch: u64) -> Self {
        self.promote_batch = promote_batch.max(1);
        self
    }

    async fn insert(
        &self,
        mut record: TaskRecord,
        delay_ms: Option<u64>,
    ) -> Result<TaskRecord, TaskgateError> {
        let mut connection_manager = self.client.get();

        record.seq = redis::cmd("INCR")
            .arg(&self.keys.seq)
            .query_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        let now_ms = self.clock.now_ms();
        record.enqueued_at_ms = now_ms;
        record.not_before_ms = delay_ms.map(|delay_ms| now_ms.saturating_add(delay_ms));

        let encoded = serde_json::to_string(&record)?;

        let _: i64 = self
            .enqueue_script
            .key(&self.keys.records)
            .key(&self.keys.ready)
            .key(&self.keys.delayed)
            .arg(record.id.to_string())
            .arg(encoded)
            .arg(record.enqueued_at_ms)
            .arg(record.seq)
            .arg(record.not_before_ms.unwrap_or(0))
            .arg(now_ms)
            .invoke_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        Ok(record)
    } // end method insert
}

fn unavailable(err: redis::RedisError) -> TaskgateError {
    tracing::error!(error = ?err, "redis.queue.error");
    TaskgateError::QueueUnavailable(err.to_string())
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, record: TaskRecord) -> Result<TaskRecord, TaskgateError> {
        self.insert(record, None).await
    }

    async fn enqueue_after(
        &self,
        record: TaskRecord,
        delay_ms: u64,
    ) -> Result<TaskRecord, TaskgateError> {
        self.insert(record, Some(delay_ms)).await
    }

    async fn claim(&self, lease_ms: u64) -> Result<Option<ClaimedTask>, TaskgateError> {
        let now_ms = self.clock.now_ms();
        let lease_token = Uuid::new_v4();
        let mut connection_manager = self.client.get();

        let claimed: Option<(String, u32, u64)> = self
            .claim_script
            .key(&self.keys.records)
            .key(&self.keys.attempts)
            .key(&self.keys.leases)
            .key(&self.keys.ready)
            .key(&self.keys.delayed)
            .key(&self.keys.inflight)
            .arg(now_ms)
            .arg(lease_ms)
            .arg(lease_token.to_string())
            .arg(self.promote_batch)
            .invoke_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        let Some((encoded, attempt, lease_expires_at_ms)) = claimed else {
            return Ok(None);
        };

        Ok(Some(ClaimedTask {
            record: serde_json::from_str(&encoded)?,
            lease_token,
            lease_expires_at_ms,
            attempt,
        }))
    } // end method claim

    async fn ack(&self, claim: &ClaimedTask) -> Result<bool, TaskgateError> {
        let mut connection_manager = self.client.get();

        let acked: i64 = self
            .ack_script
            .key(&self.keys.records)
            .key(&self.keys.attempts)
            .key(&self.keys.leases)
            .key(&self.keys.inflight)
            .arg(claim.record.id.to_string())
            .arg(claim.lease_token.to_string())
            .invoke_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        Ok(acked == 1)
    } // end method ack

    async fn release(&self, claim: &ClaimedTask, delay_ms: u64) -> Result<bool, TaskgateError> {
        let now_ms = self.clock.now_ms();

        let mut record = claim.record.clone();
        record.not_before_ms = Some(now_ms.saturating_add(delay_ms));

        let encoded = serde_json::to_string(&record)?;
        let mut connection_manager = self.client.get();

        let released: i64 = self
            .release_script
            .key(&self.keys.records)
            .key(&self.keys.leases)
            .key(&self.keys.ready)
            .key(&self.keys.delayed)
            .key(&self.keys.inflight)
            .arg(record.id.to_string())
            .arg(claim.lease_token.to_string())
            .arg(encoded)
            .arg(record.enqueued_at_ms)
            .arg(record.seq)
            .arg(record.not_before_ms.unwrap_or(now_ms))
            .arg(now_ms)
            .invoke_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        Ok(released == 1)
    } // end method release

    async fn get(&self, id: Uuid) -> Result<Option<TaskRecord>, TaskgateError> {
        let mut connection_manager = self.client.get();

        let encoded: Option<String> = redis::cmd("HGET")
            .arg(&self.keys.records)
            .arg(id.to_string())
            .query_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        encoded
            .map(|encoded| serde_json::from_str(&encoded))
            .transpose()
            .map_err(TaskgateError::from)
    }

    async fn stats(&self) -> Result<QueueStats, TaskgateError> {
        let mut connection_manager = self.client.get();

        let (ready, delayed, inflight): (u64, u64, u64) = redis::pipe()
            .zcard(&self.keys.ready)
            .zcard(&self.keys.delayed)
            .zcard(&self.keys.inflight)
            .query_async(&mut connection_manager)
            .await
            .map_err(unavailable)?;

        Ok(QueueStats {
            ready,
            delayed,
            inflight,
        })
    }
}
