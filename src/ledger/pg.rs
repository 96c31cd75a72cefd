//! Postgres-backed `LedgerStore`.
//!
//! Raw `sqlx::query`/`query_as` against a `PgPool` rather than a
//! query-builder or ORM — the query shapes here are simple enough not to
//! need one.

use super::{LedgerStore, NewTrade};
use crate::error::CoreResult;
use crate::models::{DetailedTrade, Order, OrderStatus, Submission};
use crate::models::trade::Trade;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error};
use uuid::Uuid;

/// Embedded schema, applied by `PgLedger::migrate`. This crate does not
/// take a migrations-framework dependency beyond `sqlx` itself, relying on
/// hand-applied SQL instead.
pub const SCHEMA: &str = r#"
DO $$ BEGIN
    CREATE TYPE order_side AS ENUM ('buy', 'sell');
EXCEPTION WHEN duplicate_object THEN null; END $$;

DO $$ BEGIN
    CREATE TYPE order_type AS ENUM ('limit', 'market');
EXCEPTION WHEN duplicate_object THEN null; END $$;

DO $$ BEGIN
    CREATE TYPE order_status AS ENUM ('open', 'partially_filled', 'filled', 'cancelled', 'rejected');
EXCEPTION WHEN duplicate_object THEN null; END $$;

CREATE TABLE IF NOT EXISTS orders (
    order_id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    client_id        TEXT NOT NULL,
    instrument       TEXT NOT NULL,
    side             order_side NOT NULL,
    order_type       order_type NOT NULL,
    price            NUMERIC(28, 8),
    quantity         NUMERIC(28, 8) NOT NULL,
    filled_quantity  NUMERIC(28, 8) NOT NULL DEFAULT 0,
    status           order_status NOT NULL,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_orders_instrument_status ON orders (instrument, status);

CREATE TABLE IF NOT EXISTS trades (
    trade_id         UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    buy_order_id     UUID NOT NULL REFERENCES orders (order_id),
    sell_order_id    UUID NOT NULL REFERENCES orders (order_id),
    instrument       TEXT NOT NULL,
    price            NUMERIC(28, 8) NOT NULL,
    quantity         NUMERIC(28, 8) NOT NULL,
    timestamp        TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades (timestamp DESC);
"#;

pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema. Safe to call on every process start —
    /// every statement is idempotent (`IF NOT EXISTS` / exception-swallowed
    /// `CREATE TYPE`).
    pub async fn migrate(&self) -> CoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("ledger migration failed: {}", e);
                e
            })?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn insert_open_order(&self, submission: &Submission) -> CoreResult<Order> {
        let order_type = submission.kind.order_type();
        let price = submission.kind.price();
        let quantity = submission.kind.quantity();

        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (client_id, instrument, side, order_type, price, quantity, filled_quantity, status)
            VALUES ($1, $2, $3, $4, $5, $6, 0, 'open')
            RETURNING order_id, client_id, instrument, side, order_type, price, quantity, filled_quantity, status, created_at, updated_at
            "#,
        )
        .bind(&submission.client_id)
        .bind(&submission.instrument)
        .bind(submission.side)
        .bind(order_type)
        .bind(price)
        .bind(quantity)
        .fetch_one(&self.pool)
        .await?;

        debug!("ledger: inserted open order {}", order.order_id);
        Ok(order)
    }

    async fn create_trade(&self, trade: NewTrade) -> CoreResult<Trade> {
        let row = sqlx::query_as::<_, Trade>(
            r#"
            INSERT INTO trades (buy_order_id, sell_order_id, instrument, price, quantity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING trade_id, buy_order_id, sell_order_id, instrument, price, quantity, timestamp
            "#,
        )
        .bind(trade.buy_order_id)
        .bind(trade.sell_order_id)
        .bind(&trade.instrument)
        .bind(trade.price)
        .bind(trade.quantity)
        .fetch_one(&self.pool)
        .await?;

        debug!("ledger: recorded trade {}", row.trade_id);
        Ok(row)
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> CoreResult<Order> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = $2, filled_quantity = $3, updated_at = now()
            WHERE order_id = $1
            RETURNING order_id, client_id, instrument, side, order_type, price, quantity, filled_quantity, status, created_at, updated_at
            "#,
        )
        .bind(order_id)
        .bind(status)
        .bind(filled_quantity)
        .fetch_one(&self.pool)
        .await?;

        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> CoreResult<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT order_id, client_id, instrument, side, order_type, price, quantity, filled_quantity, status, created_at, updated_at
            FROM orders WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn recent_trades(&self, limit: usize) -> CoreResult<Vec<Trade>> {
        let trades = sqlx::query_as::<_, Trade>(
            r#"
            SELECT trade_id, buy_order_id, sell_order_id, instrument, price, quantity, timestamp
            FROM trades ORDER BY timestamp DESC LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(trades)
    }

    async fn detailed_trades(&self, limit: usize) -> CoreResult<Vec<DetailedTrade>> {
        let trades = sqlx::query_as::<_, DetailedTrade>(
            r#"
            SELECT
                t.trade_id, t.buy_order_id, t.sell_order_id,
                buyer.client_id AS buyer_client_id,
                seller.client_id AS seller_client_id,
                t.instrument, t.price, t.quantity, t.timestamp
            FROM trades t
            JOIN orders buyer ON buyer.order_id = t.buy_order_id
            JOIN orders seller ON seller.order_id = t.sell_order_id
            ORDER BY t.timestamp DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(trades)
    }
}
