//! In-process backends.
//!
//! State lives in this process only, in [`DashMap`](dashmap::DashMap)s and
//! mutex-guarded collections.
//!
//! # Key Characteristics
//!
//! - **Thread-safe:** every operation is atomic per key (windows) or per transition (queue)
//! - **No external dependencies:** no network or database required
//! - **Process-scoped:** nothing is shared across processes or survives a restart
//! - **Clock-injectable:** pass a [`ManualClock`](crate::ManualClock) to step through
//!   windows and delays deterministically
//!
//! # When to Use
//!
//! ✅ Single-process development, tests, benchmarks
//!
//! ❌ Anything that needs durability or several intake processes sharing limits;
//! use the Redis backends instead.

mod local_rate_window_store;
pub use local_rate_window_store::*;

mod local_task_queue;
pub use local_task_queue::*;
