//! Intake: the only path into the system for a new order or a cancel.
//! Runs validate → claim → persist → enqueue for submissions; the claim
//! step is what gives a retried submission with the same idempotency key
//! exactly the outcome of the first attempt.

use crate::error::{CoreError, CoreResult};
use crate::idempotency::{Claim, IdempotencyStore};
use crate::ledger::LedgerStore;
use crate::models::{Order, Submission, SubmissionKind};
use crate::queue::{Job, JobQueue};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

pub struct Intake<L: LedgerStore, I: IdempotencyStore, Q: JobQueue> {
    ledger: Arc<L>,
    idempotency: Arc<I>,
    queue: Arc<Q>,
    idempotency_ttl_seconds: u64,
}

impl<L: LedgerStore, I: IdempotencyStore, Q: JobQueue> Intake<L, I, Q> {
    pub fn new(ledger: Arc<L>, idempotency: Arc<I>, queue: Arc<Q>, idempotency_ttl_seconds: u64) -> Self {
        Self {
            ledger,
            idempotency,
            queue,
            idempotency_ttl_seconds,
        }
    }

    /// validate → claim → persist → enqueue. The order is durable in the
    /// ledger before this returns; matching happens later, asynchronously,
    /// once the engine picks the job up.
    pub async fn submit(&self, submission: Submission) -> CoreResult<Order> {
        Self::validate(&submission)?;

        let claim = self
            .idempotency
            .claim(&submission.idempotency_key, self.idempotency_ttl_seconds)
            .await?;
        if claim == Claim::Duplicate {
            return Err(CoreError::Duplicate);
        }

        let order = self.ledger.insert_open_order(&submission).await?;
        self.queue
            .enqueue(Job::Submit {
                order: order.clone(),
            })
            .await?;

        Ok(order)
    }

    /// Queues a cancel for `order_id`. The terminal-state check here is
    /// advisory — it only saves a round trip through the queue for an
    /// obviously-stale request. By the time the engine processes the job
    /// the order may already have moved on (e.g. filled by an intervening
    /// submit), so the engine decides from its own serialized view of the
    /// book rather than trusting this check.
    pub async fn cancel(&self, order_id: Uuid) -> CoreResult<()> {
        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or(CoreError::NotFound(order_id))?;

        if order.status.is_terminal() {
            return Err(CoreError::Conflict(order_id));
        }

        self.queue.enqueue(Job::Cancel { order_id }).await
    }

    fn validate(submission: &Submission) -> CoreResult<()> {
        if submission.client_id.trim().is_empty() {
            return Err(CoreError::Validation("client_id must not be empty".into()));
        }
        if submission.instrument.trim().is_empty() {
            return Err(CoreError::Validation("instrument must not be empty".into()));
        }
        if submission.idempotency_key.trim().is_empty() {
            return Err(CoreError::Validation("idempotency_key must not be empty".into()));
        }

        match &submission.kind {
            SubmissionKind::Limit { price, quantity } => {
                if *price <= Decimal::ZERO {
                    return Err(CoreError::Validation("limit price must be positive".into()));
                }
                if *quantity <= Decimal::ZERO {
                    return Err(CoreError::Validation("quantity must be positive".into()));
                }
            }
            SubmissionKind::Market { quantity } => {
                if *quantity <= Decimal::ZERO {
                    return Err(CoreError::Validation("quantity must be positive".into()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::memory::InMemoryIdempotencyStore;
    use crate::ledger::memory::InMemoryLedger;
    use crate::models::Side;
    use crate::queue::memory::InMemoryJobQueue;
    use rust_decimal_macros::dec;

    fn intake() -> Intake<InMemoryLedger, InMemoryIdempotencyStore, InMemoryJobQueue> {
        Intake::new(
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(InMemoryJobQueue::new()),
            86400,
        )
    }

    fn submission(key: &str) -> Submission {
        Submission {
            client_id: "client-1".into(),
            instrument: "BTC-USD".into(),
            side: Side::Buy,
            idempotency_key: key.into(),
            kind: SubmissionKind::Limit {
                price: dec!(100),
                quantity: dec!(1),
            },
        }
    }

    #[tokio::test]
    async fn submit_persists_and_enqueues() {
        let intake = intake();
        let order = intake.submit(submission("key-1")).await.unwrap();
        assert_eq!(order.status, crate::models::OrderStatus::Open);

        let job = intake.queue.next().await.unwrap();
        assert_eq!(job.order_id(), order.order_id);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let intake = intake();
        intake.submit(submission("key-1")).await.unwrap();
        let result = intake.submit(submission("key-1")).await;
        assert!(matches!(result, Err(CoreError::Duplicate)));
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected_before_touching_the_ledger() {
        let intake = intake();
        let mut bad = submission("key-1");
        bad.kind = SubmissionKind::Limit {
            price: dec!(100),
            quantity: dec!(0),
        };
        let result = intake.submit(bad).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn cancel_of_unknown_order_is_not_found() {
        let intake = intake();
        let result = intake.cancel(Uuid::new_v4()).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }
}
