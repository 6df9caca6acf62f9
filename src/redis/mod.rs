//! Redis-backed window store and task queue.
//!
//! Rate counters and queue records share one Redis deployment and are kept
//! apart by key prefix. Every multi-step operation is a Lua script, so it is
//! atomic within Redis regardless of how many intake or worker processes
//! connect.

mod common;
pub use common::*;

mod redis_rate_window_store;
pub use redis_rate_window_store::*;

mod redis_task_queue;
pub use redis_task_queue::*;
