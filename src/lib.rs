#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub use error::*;

mod clock;
pub use clock::*;

mod common;
pub use common::*;

mod rate_window;
pub use rate_window::*;

mod task_queue;
pub use task_queue::*;

pub mod local;
pub use local::*;

#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "redis")]
pub use crate::redis::*;

mod stores;
pub use stores::*;

mod admission;
pub use admission::*;

mod executor;
pub use executor::*;

mod worker;
pub use worker::*;

mod intake;
pub use intake::*;

mod http;
pub use http::*;

pub mod config;

mod logger;
pub use logger::*;

#[cfg(test)]
mod tests;
