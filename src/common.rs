use std::{fmt, ops::Deref, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::TaskgateError;

/// Number of points a window grants per period.
///
/// Must be at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowPoints(u64);

impl Deref for WindowPoints {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowPoints {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value < 1 {
            Err("Window points must be at least 1")
        } else {
            Ok(Self(value))
        }
    }
}

/// Length of a window period in milliseconds.
///
/// Must be greater than 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowPeriodMs(u64);

impl Deref for WindowPeriodMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowPeriodMs {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err("Window period must be greater than 0")
        } else {
            Ok(Self(value))
        }
    }
}

/// How long a subject stays blocked after its first over-limit consume.
///
/// Must be greater than 0; a window without blocking uses `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockDurationMs(u64);

impl Deref for BlockDurationMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for BlockDurationMs {
    type Error = &'static str;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err("Block duration must be greater than 0")
        } else {
            Ok(Self(value))
        }
    }
}

/// A validated newtype for Redis key segments (prefixes, window and queue
/// names).
///
/// This is a string with the following constraints:
/// - Must not be empty
/// - Must not be longer than 255 bytes
/// - Must not contain colons
#[derive(Debug, Clone, PartialEq, PartialOrd, Hash, Eq)]
pub struct RedisKey(Arc<str>);

impl RedisKey {
    /// The prefix used when none is configured.
    pub fn default_prefix() -> Self {
        Self(Arc::from("taskgate"))
    }
}

impl Deref for RedisKey {
    type Target = Arc<str>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for RedisKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RedisKey {
    type Error = TaskgateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TaskgateError::InvalidRedisKey(
                "Redis key must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(TaskgateError::InvalidRedisKey(
                "Redis key must not be longer than 255 characters".to_string(),
            ))
        } else if value.contains(':') {
            Err(TaskgateError::InvalidRedisKey(
                "Redis key must not contain colons".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for RedisKey {
    type Error = TaskgateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

/// Opaque identifier of the submitting user.
///
/// Keys both rate windows and travels with the task record. Any non-empty
/// string up to 255 bytes is accepted; it is always the last segment of a
/// Redis key, so colons are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(Arc<str>);

impl SubjectId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SubjectId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SubjectId {
    type Error = TaskgateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(TaskgateError::InvalidSubject(
                "subject id must not be empty".to_string(),
            ))
        } else if value.len() > 255 {
            Err(TaskgateError::InvalidSubject(
                "subject id must not be longer than 255 bytes".to_string(),
            ))
        } else {
            Ok(Self(Arc::from(value)))
        }
    }
}

impl TryFrom<&str> for SubjectId {
    type Error = TaskgateError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::try_from(value.to_string())
    }
}

impl From<SubjectId> for String {
    fn from(value: SubjectId) -> Self {
        value.0.to_string()
    }
}

/// A named fixed window: `points` per `period`, optionally blocking the
/// subject for `block_duration` once it goes over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    name: RedisKey,
    points: WindowPoints,
    period: WindowPeriodMs,
    block_duration: Option<BlockDurationMs>,
}

impl RateWindow {
    /// Create a window without a block duration.
    pub fn new(name: RedisKey, points: WindowPoints, period: WindowPeriodMs) -> Self {
        Self {
            name,
            points,
            period,
            block_duration: None,
        }
    }

    /// Pin denied subjects to `block_duration` instead of the normal refill.
    pub fn with_block_duration(mut self, block_duration: BlockDurationMs) -> Self {
        self.block_duration = Some(block_duration);
        self
    }

    /// Build a window from raw numbers, validating every field.
    ///
    /// A `block_duration_ms` of 0 means no blocking.
    pub fn from_raw(
        name: &str,
        points: u64,
        period_ms: u64,
        block_duration_ms: u64,
    ) -> Result<Self, TaskgateError> {
        let name = RedisKey::try_from(name)?;
        let points = WindowPoints::try_from(points)
            .map_err(|e| TaskgateError::InvalidRateWindow(format!("{name}: {e}")))?;
        let period = WindowPeriodMs::try_from(period_ms)
            .map_err(|e| TaskgateError::InvalidRateWindow(format!("{name}: {e}")))?;

        let window = Self::new(name, points, period);

        match block_duration_ms {
            0 => Ok(window),
            ms => Ok(window.with_block_duration(BlockDurationMs(ms))),
        }
    }

    /// Window name, used as a key segment.
    pub fn name(&self) -> &RedisKey {
        &self.name
    }

    /// Capacity per period.
    pub fn points(&self) -> WindowPoints {
        self.points
    }

    /// Period length.
    pub fn period(&self) -> WindowPeriodMs {
        self.period
    }

    /// Block duration, if the window punishes going over.
    pub fn block_duration(&self) -> Option<BlockDurationMs> {
        self.block_duration
    }
}

/// Outcome of consuming one point from a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeDecision {
    /// The point was granted.
    Allowed {
        /// Points left in the current period.
        remaining_points: u64,
    },
    /// The window is exhausted.
    Denied {
        /// Milliseconds until the counter resets (or the block expires).
        ms_before_next: u64,
    },
}
