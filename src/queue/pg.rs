//! Postgres-backed `JobQueue`: a durable FIFO table polled by the single
//! engine consumer. `FOR UPDATE SKIP LOCKED` is used defensively even
//! though `queue_concurrency` is fixed at 1 — it costs nothing and keeps
//! this adapter honest if ever pointed at more than one consumer.
//!
//! A `submit` job carries the full order snapshot (spec §3/§4.4), so the
//! row stores every order column alongside the job metadata; a `cancel`
//! job carries only `order_id` and leaves those columns null.

use super::{Job, JobQueue};
use crate::error::CoreResult;
use crate::models::{Order, OrderStatus, OrderType, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_queue (
    job_id           BIGSERIAL PRIMARY KEY,
    job_type         TEXT NOT NULL,
    order_id         UUID NOT NULL,
    client_id        TEXT,
    instrument       TEXT,
    side             order_side,
    order_type       order_type,
    price            NUMERIC(28, 8),
    quantity         NUMERIC(28, 8),
    filled_quantity  NUMERIC(28, 8),
    status           order_status,
    order_created_at TIMESTAMPTZ,
    order_updated_at TIMESTAMPTZ,
    enqueued_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_job_queue_enqueued_at ON job_queue (enqueued_at);
"#;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

type JobRow = (
    i64,
    String,
    Uuid,
    Option<String>,
    Option<String>,
    Option<Side>,
    Option<OrderType>,
    Option<Decimal>,
    Option<Decimal>,
    Option<Decimal>,
    Option<OrderStatus>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: Job) -> CoreResult<()> {
        match job {
            Job::Submit { order } => {
                sqlx::query(
                    r#"
                    INSERT INTO job_queue (
                        job_type, order_id, client_id, instrument, side, order_type,
                        price, quantity, filled_quantity, status, order_created_at, order_updated_at
                    )
                    VALUES ('submit', $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(order.order_id)
                .bind(&order.client_id)
                .bind(&order.instrument)
                .bind(order.side)
                .bind(order.order_type)
                .bind(order.price)
                .bind(order.quantity)
                .bind(order.filled_quantity)
                .bind(order.status)
                .bind(order.created_at)
                .bind(order.updated_at)
                .execute(&self.pool)
                .await?;
            }
            Job::Cancel { order_id } => {
                sqlx::query("INSERT INTO job_queue (job_type, order_id) VALUES ('cancel', $1)")
                    .bind(order_id)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    async fn next(&self) -> CoreResult<Job> {
        loop {
            let mut tx = self.pool.begin().await?;

            let row: Option<JobRow> = sqlx::query_as(
                r#"
                SELECT
                    job_id, job_type, order_id, client_id, instrument, side, order_type,
                    price, quantity, filled_quantity, status, order_created_at, order_updated_at
                FROM job_queue
                ORDER BY job_id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
                "#,
            )
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((
                job_id,
                job_type,
                order_id,
                client_id,
                instrument,
                side,
                order_type,
                price,
                quantity,
                filled_quantity,
                status,
                order_created_at,
                order_updated_at,
            )) = row
            {
                sqlx::query("DELETE FROM job_queue WHERE job_id = $1")
                    .bind(job_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;

                let job = if job_type == "cancel" {
                    Job::Cancel { order_id }
                } else {
                    Job::Submit {
                        order: Order {
                            order_id,
                            client_id: client_id.unwrap_or_default(),
                            instrument: instrument.unwrap_or_default(),
                            side: side.unwrap_or(Side::Buy),
                            order_type: order_type.unwrap_or(OrderType::Limit),
                            price,
                            quantity: quantity.unwrap_or(Decimal::ZERO),
                            filled_quantity: filled_quantity.unwrap_or(Decimal::ZERO),
                            status: status.unwrap_or(OrderStatus::Open),
                            created_at: order_created_at.unwrap_or_else(Utc::now),
                            updated_at: order_updated_at.unwrap_or_else(Utc::now),
                        },
                    }
                };
                return Ok(job);
            }

            tx.rollback().await?;
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
