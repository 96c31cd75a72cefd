//! Redis-backed cache client, used by the idempotency gate (C3).

pub mod redis_client;

pub use redis_client::{RedisClient, RedisConfig};
