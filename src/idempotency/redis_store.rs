//! Redis-backed `IdempotencyStore`, using `SET key val NX EX ttl` as the
//! atomic claim primitive (`RedisClient::set_nx_ex`).

use super::{Claim, IdempotencyStore};
use crate::cache::RedisClient;
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use std::sync::Arc;

pub struct RedisIdempotencyStore {
    client: Arc<RedisClient>,
}

impl RedisIdempotencyStore {
    pub fn new(client: Arc<RedisClient>) -> Self {
        Self { client }
    }

    fn cache_key(key: &str) -> String {
        format!("idempotency:{}", key)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn claim(&self, key: &str, ttl_secs: u64) -> CoreResult<Claim> {
        let newly_set = self
            .client
            .set_nx_ex(&Self::cache_key(key), "1", ttl_secs)
            .await
            .map_err(|e| CoreError::Cache(e.to_string()))?;

        Ok(if newly_set { Claim::New } else { Claim::Duplicate })
    }
}
