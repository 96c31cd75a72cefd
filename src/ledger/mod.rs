//! Ledger: the durable, append-only source of truth for orders and trades.
//!
//! `LedgerStore` is the contract the matching engine and intake depend on;
//! `pg` provides the production Postgres-backed implementation and
//! `memory` an in-process implementation used by tests and by any
//! embedder that doesn't want a database for unit-testing its own glue.

pub mod memory;
pub mod pg;

use crate::error::CoreResult;
use crate::models::{DetailedTrade, Order, OrderStatus, Submission, Trade};
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// A trade awaiting an id and timestamp, assigned by the store on insert —
/// mirrors how `Order::order_id` is assigned by the ledger on
/// `insert_open_order`.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub instrument: String,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a new order with `status = open`, `filled_quantity = 0`.
    /// Transactional and durable before return.
    async fn insert_open_order(&self, submission: &Submission) -> CoreResult<Order>;

    /// Records a trade. The engine relies on this being idempotent only
    /// under job-level deduplication it itself enforces — the ledger does
    /// not deduplicate trades on its own.
    async fn create_trade(&self, trade: NewTrade) -> CoreResult<Trade>;

    /// Sets `(status, filled_quantity)`. Idempotent at the value level:
    /// writing the same pair twice is harmless.
    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> CoreResult<Order>;

    async fn get_order(&self, order_id: Uuid) -> CoreResult<Option<Order>>;

    /// Ordered by `timestamp` descending, bounded by `limit`.
    async fn recent_trades(&self, limit: usize) -> CoreResult<Vec<Trade>>;

    /// Like `recent_trades` but joined with both counterparties' client ids.
    async fn detailed_trades(&self, limit: usize) -> CoreResult<Vec<DetailedTrade>>;
}
