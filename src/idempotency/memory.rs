//! In-memory `IdempotencyStore` for tests and embedders without Redis.
//! TTL is tracked by wall-clock expiry rather than an actual eviction
//! thread — entries are lazily reaped on the next `claim` that touches
//! the same key after expiry.

use super::{Claim, IdempotencyStore};
use crate::error::CoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    claims: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn claim(&self, key: &str, ttl_secs: u64) -> CoreResult<Claim> {
        let now = Utc::now();
        let mut claims = self.claims.lock();

        if let Some(expires_at) = claims.get(key) {
            if *expires_at > now {
                return Ok(Claim::Duplicate);
            }
        }

        claims.insert(key.to_string(), now + chrono::Duration::seconds(ttl_secs as i64));
        Ok(Claim::New)
    }
}
