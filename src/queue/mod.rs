//! Job Queue: the durable hand-off between intake and the matching
//! engine. `queue_concurrency` is fixed at 1 — there is exactly one
//! consumer, so queue order is processing order, which is what makes the
//! engine's "happens-before" guarantee between consecutive jobs' side
//! effects possible.

pub mod memory;
pub mod pg;

use crate::error::CoreResult;
use crate::models::Order;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum Job {
    /// A newly-persisted order, carrying the full snapshot as persisted —
    /// spec §3/§4.4 require the job to carry the whole order, not just its
    /// id, so the engine never needs a second ledger round trip to learn
    /// what it is matching.
    Submit { order: Order },
    /// A cancel request for an already-known order.
    Cancel { order_id: Uuid },
}

impl Job {
    pub fn order_id(&self) -> Uuid {
        match self {
            Job::Submit { order } => order.order_id,
            Job::Cancel { order_id } => *order_id,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Durably records `job` for later processing. Must return only after
    /// the job is durable — the engine may crash and restart and must still
    /// see it.
    async fn enqueue(&self, job: Job) -> CoreResult<()>;

    /// Blocks until the next job is available and returns it. Exactly one
    /// caller may be awaiting this at a time in this process — the
    /// engine's single consumer task.
    async fn next(&self) -> CoreResult<Job>;
}
