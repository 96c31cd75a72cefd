//! In-memory `LedgerStore`, used by unit tests for the book and matching
//! engine so they don't need a live Postgres instance. Integration tests
//! that exercise `pg::PgLedger` itself require a real database connection
//! and live separately.

use super::{LedgerStore, NewTrade};
use crate::error::{CoreError, CoreResult};
use crate::models::{DetailedTrade, Order, OrderStatus, Submission};
use crate::models::trade::Trade;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    trades: Vec<Trade>,
}

pub struct InMemoryLedger {
    inner: Mutex<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_open_order(&self, submission: &Submission) -> CoreResult<Order> {
        let now = Utc::now();
        let order = Order {
            order_id: Uuid::new_v4(),
            client_id: submission.client_id.clone(),
            instrument: submission.instrument.clone(),
            side: submission.side,
            order_type: submission.kind.order_type(),
            price: submission.kind.price(),
            quantity: submission.kind.quantity(),
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: now,
            updated_at: now,
        };

        let mut inner = self.inner.lock();
        inner.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn create_trade(&self, trade: NewTrade) -> CoreResult<Trade> {
        let row = Trade {
            trade_id: Uuid::new_v4(),
            buy_order_id: trade.buy_order_id,
            sell_order_id: trade.sell_order_id,
            instrument: trade.instrument,
            price: trade.price,
            quantity: trade.quantity,
            timestamp: Utc::now(),
        };

        let mut inner = self.inner.lock();
        inner.trades.push(row.clone());
        Ok(row)
    }

    async fn update_order_status(
        &self,
        order_id: Uuid,
        status: OrderStatus,
        filled_quantity: Decimal,
    ) -> CoreResult<Order> {
        let mut inner = self.inner.lock();
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(CoreError::NotFound(order_id))?;
        order.status = status;
        order.filled_quantity = filled_quantity;
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn get_order(&self, order_id: Uuid) -> CoreResult<Option<Order>> {
        Ok(self.inner.lock().orders.get(&order_id).cloned())
    }

    async fn recent_trades(&self, limit: usize) -> CoreResult<Vec<Trade>> {
        let inner = self.inner.lock();
        let mut trades = inner.trades.clone();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(limit);
        Ok(trades)
    }

    async fn detailed_trades(&self, limit: usize) -> CoreResult<Vec<DetailedTrade>> {
        let inner = self.inner.lock();
        let mut trades = inner.trades.clone();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(limit);

        let detailed = trades
            .into_iter()
            .filter_map(|t| {
                let buyer = inner.orders.get(&t.buy_order_id)?;
                let seller = inner.orders.get(&t.sell_order_id)?;
                Some(DetailedTrade {
                    trade_id: t.trade_id,
                    buy_order_id: t.buy_order_id,
                    sell_order_id: t.sell_order_id,
                    buyer_client_id: buyer.client_id.clone(),
                    seller_client_id: seller.client_id.clone(),
                    instrument: t.instrument,
                    price: t.price,
                    quantity: t.quantity,
                    timestamp: t.timestamp,
                })
            })
            .collect();

        Ok(detailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, SubmissionKind};
    use rust_decimal_macros::dec;

    fn submission() -> Submission {
        Submission {
            client_id: "client-1".into(),
            instrument: "BTC-USD".into(),
            side: Side::Buy,
            idempotency_key: "key-1".into(),
            kind: SubmissionKind::Limit {
                price: dec!(70100),
                quantity: dec!(0.5),
            },
        }
    }

    #[tokio::test]
    async fn insert_then_fetch() {
        let ledger = InMemoryLedger::new();
        let order = ledger.insert_open_order(&submission()).await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);

        let fetched = ledger.get_order(order.order_id).await.unwrap().unwrap();
        assert_eq!(fetched.order_id, order.order_id);
    }

    #[tokio::test]
    async fn update_status_is_idempotent_at_value_level() {
        let ledger = InMemoryLedger::new();
        let order = ledger.insert_open_order(&submission()).await.unwrap();

        let first = ledger
            .update_order_status(order.order_id, OrderStatus::Filled, dec!(0.5))
            .await
            .unwrap();
        let second = ledger
            .update_order_status(order.order_id, OrderStatus::Filled, dec!(0.5))
            .await
            .unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.filled_quantity, second.filled_quantity);
    }

    #[tokio::test]
    async fn recent_trades_ordered_descending_and_bounded() {
        let ledger = InMemoryLedger::new();
        let a = ledger.insert_open_order(&submission()).await.unwrap();
        let b = ledger.insert_open_order(&submission()).await.unwrap();

        for _ in 0..3 {
            ledger
                .create_trade(NewTrade {
                    buy_order_id: a.order_id,
                    sell_order_id: b.order_id,
                    instrument: "BTC-USD".into(),
                    price: dec!(70100),
                    quantity: dec!(0.1),
                })
                .await
                .unwrap();
        }

        let trades = ledger.recent_trades(2).await.unwrap();
        assert_eq!(trades.len(), 2);
    }
}
