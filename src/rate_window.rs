//! Shared per-subject window counters.
//!
//! Two backends implement [`RateWindowStore`]:
//!
//! - [`LocalRateWindowStore`](crate::LocalRateWindowStore): in-process, DashMap-backed
//! - [`RedisRateWindowStore`](crate::RedisRateWindowStore): shared across processes, one Lua
//!   script per consume (requires the `redis` feature)
//!
//! Both implement the same fixed-window semantics:
//!
//! 1. The first consume for `(window, subject)` opens a counter that lives for `period`
//! 2. Every consume adds one point, including denied ones
//! 3. While the count is within `points` the consume is [`ConsumeDecision::Allowed`]
//! 4. Past that it is [`ConsumeDecision::Denied`] with the time left on the counter
//! 5. If the window has a block duration, the first over-limit consume re-pins the
//!    counter's expiry to `now + block_duration`; later denials report what is left of it

use async_trait::async_trait;

use crate::{ConsumeDecision, RateWindow, SubjectId, TaskgateError};

/// Atomic "consume one point" over shared window counters.
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// Deduct one point from `subject`'s counter for `window`.
    ///
    /// The read-modify-write is atomic per `(window, subject)`: two concurrent
    /// consumes never both see the last point.
    ///
    /// # Errors
    ///
    /// [`TaskgateError::StoreUnavailable`] if the backing store cannot be
    /// reached. This is never reported as a denial.
    async fn consume(
        &self,
        window: &RateWindow,
        subject: &SubjectId,
    ) -> Result<ConsumeDecision, TaskgateError>;
}
