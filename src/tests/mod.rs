
mod test_intake;
mod test_local_rate_window_store;

#[cfg(feature = "redis")]
mod test_redis_rate_window_store;
