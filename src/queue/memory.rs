//! In-process `JobQueue` over a `tokio::sync::mpsc` unbounded channel, for
//! tests and embedders that don't want a Postgres-backed queue.

use super::{Job, JobQueue};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

pub struct InMemoryJobQueue {
    tx: UnboundedSender<Job>,
    rx: Mutex<UnboundedReceiver<Job>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> CoreResult<()> {
        self.tx
            .send(job)
            .map_err(|e| CoreError::Queue(e.to_string()))
    }

    async fn next(&self) -> CoreResult<Job> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| CoreError::Queue("queue closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Order, OrderStatus, OrderType, Side};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn stub_order(order_id: Uuid) -> Order {
        let now = chrono::Utc::now();
        Order {
            order_id,
            client_id: "client-1".into(),
            instrument: "BTC-USD".into(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            price: Some(Decimal::from(100)),
            quantity: Decimal::ONE,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn jobs_are_delivered_fifo() {
        let queue = InMemoryJobQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        queue.enqueue(Job::Submit { order: stub_order(a) }).await.unwrap();
        queue.enqueue(Job::Submit { order: stub_order(b) }).await.unwrap();

        assert_eq!(queue.next().await.unwrap().order_id(), a);
        assert_eq!(queue.next().await.unwrap().order_id(), b);
    }
}
