//! Idempotency gate: a TTL-bounded compare-and-set in front of intake.
//! `claim` is the only operation — it atomically records that `key` has
//! been seen and reports whether this caller is the first to see it within
//! the TTL window.
//!
//! A trait at the seam, a Redis-backed production adapter, and an
//! in-memory adapter for tests that don't want a Redis instance.

pub mod memory;
pub mod redis_store;

use crate::error::CoreResult;
use async_trait::async_trait;

/// Outcome of a `claim` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// `key` was unclaimed and is now claimed by this call.
    New,
    /// `key` was already claimed within its TTL window — a duplicate
    /// submission. A caller retrying with the same idempotency key must
    /// observe exactly the outcome of the first attempt.
    Duplicate,
}

impl Claim {
    pub fn is_new(self) -> bool {
        matches!(self, Claim::New)
    }
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Attempts to claim `key` for `ttl_secs` seconds. Must fail (`Err`)
    /// rather than default to either `Claim` variant when the underlying
    /// store is unreachable — the gate fails closed.
    async fn claim(&self, key: &str, ttl_secs: u64) -> CoreResult<Claim>;
}
