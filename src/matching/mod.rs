//! Matching engine: the single serialized consumer of the job queue.
//! There is exactly one of these running per instrument —
//! `queue_concurrency` is fixed at 1 (`crate::config::QUEUE_CONCURRENCY`) —
//! which is what makes the update-ordering discipline below sound: no two
//! jobs' side effects on ledger/book/broadcast can interleave. Every book
//! mutation happens strictly after its ledger write is durable.

use crate::book::{OrderBook, RestingOrder};
use crate::error::{CoreError, CoreResult};
use crate::ledger::{LedgerStore, NewTrade};
use crate::models::{Order, OrderStatus, Side, Trade};
use crate::queue::{Job, JobQueue};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// How a market order is resolved when the opposite side of the book is
/// empty. `PartiallyFilledZeroFill` is the only variant today — kept as a
/// named enum rather than a bare bool so a future second policy doesn't
/// require changing the engine's call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarketAgainstEmptyPolicy {
    #[default]
    PartiallyFilledZeroFill,
}

#[derive(Debug, Clone)]
pub enum CoreEvent {
    Trade {
        trade: Trade,
        buy_order_id: Uuid,
        sell_order_id: Uuid,
    },
    OrderUpdate {
        order: Order,
    },
    OrderbookDelta {
        instrument: String,
        side: Side,
        price: Decimal,
        total_remaining: Decimal,
    },
    Warning {
        message: String,
    },
}

pub struct Engine<L: LedgerStore, Q: JobQueue> {
    ledger: Arc<L>,
    queue: Arc<Q>,
    book: Arc<OrderBook>,
    events: broadcast::Sender<CoreEvent>,
    match_epsilon: Decimal,
    market_empty_policy: MarketAgainstEmptyPolicy,
}

impl<L: LedgerStore, Q: JobQueue> Engine<L, Q> {
    pub fn new(
        ledger: Arc<L>,
        queue: Arc<Q>,
        book: Arc<OrderBook>,
        events: broadcast::Sender<CoreEvent>,
        match_epsilon: Decimal,
    ) -> Self {
        Self {
            ledger,
            queue,
            book,
            events,
            match_epsilon,
            market_empty_policy: MarketAgainstEmptyPolicy::default(),
        }
    }

    fn exhausted(&self, remaining: Decimal) -> bool {
        remaining <= self.match_epsilon
    }

    fn crosses(&self, taker_side: Side, limit_price: Option<Decimal>, candidate: Decimal) -> bool {
        match (taker_side, limit_price) {
            (_, None) => true, // market order: any resting price crosses
            (Side::Buy, Some(limit)) => candidate <= limit,
            (Side::Sell, Some(limit)) => candidate >= limit,
        }
    }

    fn emit(&self, event: CoreEvent) {
        // A lagging/absent receiver is not this engine's problem — the
        // broadcast channel drops the event and we move on. The event
        // stream is best-effort, not a durability boundary; the ledger is.
        let _ = self.events.send(event);
    }

    fn emit_delta(&self, side: Side, price: Decimal) {
        self.emit(CoreEvent::OrderbookDelta {
            instrument: self.book.instrument().to_string(),
            side,
            price,
            total_remaining: self.book.level_total(side, price),
        });
    }

    /// Drains the queue forever. Per-job failures are logged and do not
    /// stop the loop; only the queue itself failing (e.g. closed) does,
    /// since that means this engine instance can no longer make progress.
    pub async fn run(&self) -> CoreResult<()> {
        loop {
            let job = self.queue.next().await?;
            let job_order_id = job.order_id();
            if let Err(e) = self.process(job).await {
                warn!("engine: job for order {} failed: {}", job_order_id, e);
            }
        }
    }

    async fn process(&self, job: Job) -> CoreResult<()> {
        match job {
            Job::Submit { order } => self.process_submit(order).await,
            Job::Cancel { order_id } => self.process_cancel(order_id).await,
        }
    }

    /// `order` is the snapshot carried by the job (spec §3/§4.4) — no
    /// ledger round trip is needed to learn what the taker is before
    /// matching starts.
    async fn process_submit(&self, order: Order) -> CoreResult<()> {
        if order.status.is_terminal() {
            // Already resolved (e.g. a duplicate job from a crash-restart
            // replay); nothing left to match.
            return Ok(());
        }

        let taker_side = order.side;
        let limit_price = order.price;
        let mut remaining = order.remaining();
        let mut filled = order.filled_quantity;

        while !self.exhausted(remaining) {
            let Some(candidate_price) = self.book.best_opposite(taker_side) else {
                break;
            };
            if !self.crosses(taker_side, limit_price, candidate_price) {
                break;
            }

            let maker_side = taker_side.opposite();
            let Some(maker_id) = self.book.pop_oldest_at(maker_side, candidate_price) else {
                // The price index had an entry but its sequence was empty
                // (orphaned level). `pop_oldest_at` already removed it
                // from the index; retry against whatever is now the best
                // opposite price rather than abandoning the match
                // entirely.
                warn!(
                    "engine: orphaned empty level at {}/{}",
                    self.book.instrument(), candidate_price
                );
                self.emit(CoreEvent::Warning {
                    message: format!(
                        "orphaned empty level at {}/{} removed",
                        self.book.instrument(),
                        candidate_price
                    ),
                });
                continue;
            };
            let Some(maker) = self.book.fetch(maker_id) else {
                warn!(
                    "engine: orphaned order id {} in book level {}/{}",
                    maker_id, self.book.instrument(), candidate_price
                );
                self.emit(CoreEvent::Warning {
                    message: format!(
                        "orphaned resting order {} removed from {} at {}",
                        maker_id,
                        self.book.instrument(),
                        candidate_price
                    ),
                });
                continue;
            };

            let fill_qty = remaining.min(maker.remaining);
            let trade_price = maker.price;

            let (buy_order_id, sell_order_id) = match taker_side {
                Side::Buy => (order.order_id, maker.order_id),
                Side::Sell => (maker.order_id, order.order_id),
            };

            let trade = self
                .ledger
                .create_trade(NewTrade {
                    buy_order_id,
                    sell_order_id,
                    instrument: order.instrument.clone(),
                    price: trade_price,
                    quantity: fill_qty,
                })
                .await?;
            debug!("engine: trade {} @ {} x {}", trade.trade_id, trade_price, fill_qty);

            // §4.5.4 ordering: the maker's ledger row must be durable
            // before the book reflects the fill, so `maker_new_remaining`
            // is computed here without touching the book — the mutation
            // (`reduce`/`take`/`push_front_at`) happens only after
            // `update_order_status(maker)` below returns.
            let maker_new_remaining = maker.remaining - fill_qty;
            let maker_filled = maker.quantity - maker_new_remaining;
            if maker_filled > maker.quantity {
                return Err(CoreError::Invariant(format!(
                    "maker {} filled_quantity {} exceeds quantity {}",
                    maker.order_id, maker_filled, maker.quantity
                )));
            }
            let maker_status = if self.exhausted(maker_new_remaining) {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            let maker_order = self
                .ledger
                .update_order_status(maker.order_id, maker_status, maker_filled)
                .await?;

            if maker_status == OrderStatus::Filled {
                self.book.take(maker_id);
            } else {
                self.book.reduce(maker_id, fill_qty);
                self.book.push_front_at(maker_side, candidate_price, maker_id);
            }

            remaining -= fill_qty;
            filled += fill_qty;
            if filled > order.quantity {
                return Err(CoreError::Invariant(format!(
                    "order {} filled_quantity {} exceeds quantity {}",
                    order.order_id, filled, order.quantity
                )));
            }
            let taker_status = if self.exhausted(remaining) {
                OrderStatus::Filled
            } else {
                OrderStatus::PartiallyFilled
            };
            let taker_order = self
                .ledger
                .update_order_status(order.order_id, taker_status, filled)
                .await?;

            self.emit(CoreEvent::Trade {
                trade,
                buy_order_id,
                sell_order_id,
            });
            self.emit(CoreEvent::OrderUpdate { order: maker_order });
            self.emit(CoreEvent::OrderUpdate { order: taker_order });
            self.emit_delta(maker_side, candidate_price);
        }

        if order.order_type == crate::models::OrderType::Limit {
            if !self.exhausted(remaining) {
                let price = limit_price.expect("limit order always carries a price");
                self.book.append_at(RestingOrder {
                    order_id: order.order_id,
                    client_id: order.client_id.clone(),
                    side: taker_side,
                    price,
                    quantity: order.quantity,
                    remaining,
                });
                self.emit_delta(taker_side, price);
            }
        } else if filled == order.filled_quantity {
            // Market order, never rested, and the loop above made no
            // progress at all: the opposite side was empty.
            let status = match self.market_empty_policy {
                MarketAgainstEmptyPolicy::PartiallyFilledZeroFill => OrderStatus::PartiallyFilled,
            };
            let updated = self
                .ledger
                .update_order_status(order.order_id, status, filled)
                .await?;
            self.emit(CoreEvent::OrderUpdate { order: updated });
        }

        Ok(())
    }

    /// The book's order map, not the ledger's status column, is what
    /// decides whether a cancel actually does anything. An order absent
    /// from the book has already reached a terminal state through a prior
    /// job (most commonly a fill that raced the cancel through the queue)
    /// — the ledger already reflects that, and the cancel is a success
    /// no-op, not an error. `Intake::cancel` does the terminal-state
    /// `Conflict` check; by the time a job reaches here that check is
    /// advisory only, since the order's state may have moved on.
    async fn process_cancel(&self, order_id: Uuid) -> CoreResult<()> {
        let Some(removed) = self.book.remove(order_id) else {
            return Ok(());
        };

        let order = self
            .ledger
            .get_order(order_id)
            .await?
            .ok_or(CoreError::NotFound(order_id))?;

        let updated = self
            .ledger
            .update_order_status(order_id, OrderStatus::Cancelled, order.filled_quantity)
            .await?;

        self.emit_delta(removed.side, removed.price);
        self.emit(CoreEvent::OrderUpdate { order: updated });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::memory::InMemoryLedger;
    use crate::models::{Submission, SubmissionKind};
    use crate::queue::memory::InMemoryJobQueue;
    use rust_decimal_macros::dec;

    fn engine() -> (Engine<InMemoryLedger, InMemoryJobQueue>, Arc<InMemoryLedger>, Arc<InMemoryJobQueue>, Arc<OrderBook>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let queue = Arc::new(InMemoryJobQueue::new());
        let book = Arc::new(OrderBook::new("BTC-USD"));
        let (tx, _rx) = broadcast::channel(64);
        let engine = Engine::new(ledger.clone(), queue.clone(), book.clone(), tx, dec!(0.00000001));
        (engine, ledger, queue, book)
    }

    fn limit(side: Side, price: Decimal, qty: Decimal) -> Submission {
        Submission {
            client_id: "client-1".into(),
            instrument: "BTC-USD".into(),
            side,
            idempotency_key: Uuid::new_v4().to_string(),
            kind: SubmissionKind::Limit { price, quantity: qty },
        }
    }

    fn market(side: Side, qty: Decimal) -> Submission {
        Submission {
            client_id: "client-1".into(),
            instrument: "BTC-USD".into(),
            side,
            idempotency_key: Uuid::new_v4().to_string(),
            kind: SubmissionKind::Market { quantity: qty },
        }
    }

    #[tokio::test]
    async fn resting_limit_order_with_no_cross_joins_the_book() {
        let (engine, ledger, _queue, book) = engine();
        let order = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();

        engine.process_submit(order.clone()).await.unwrap();

        assert_eq!(book.best_price(Side::Buy), Some(dec!(100)));
        let stored = ledger.get_order(order.order_id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn crossing_limit_order_fully_fills_resting_maker() {
        let (engine, ledger, _queue, book) = engine();
        let maker = ledger.insert_open_order(&limit(Side::Sell, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(maker.clone()).await.unwrap();

        let taker = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(taker.clone()).await.unwrap();

        assert_eq!(book.order_count(), 0);
        let maker_final = ledger.get_order(maker.order_id).await.unwrap().unwrap();
        let taker_final = ledger.get_order(taker.order_id).await.unwrap().unwrap();
        assert_eq!(maker_final.status, OrderStatus::Filled);
        assert_eq!(taker_final.status, OrderStatus::Filled);

        let trades = ledger.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(100));
        assert_eq!(trades[0].quantity, dec!(1));
    }

    #[tokio::test]
    async fn partial_fill_leaves_maker_resting_with_reduced_quantity() {
        let (engine, ledger, _queue, book) = engine();
        let maker = ledger.insert_open_order(&limit(Side::Sell, dec!(100), dec!(2))).await.unwrap();
        engine.process_submit(maker.clone()).await.unwrap();

        let taker = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(taker.clone()).await.unwrap();

        let maker_final = ledger.get_order(maker.order_id).await.unwrap().unwrap();
        assert_eq!(maker_final.status, OrderStatus::PartiallyFilled);
        assert_eq!(maker_final.filled_quantity, dec!(1));
        assert_eq!(book.fetch(maker.order_id).unwrap().remaining, dec!(1));
    }

    #[tokio::test]
    async fn market_order_against_empty_book_is_partially_filled_with_zero_fill() {
        let (engine, ledger, _queue, _book) = engine();
        let taker = ledger.insert_open_order(&market(Side::Buy, dec!(1))).await.unwrap();

        engine.process_submit(taker.clone()).await.unwrap();

        let final_order = ledger.get_order(taker.order_id).await.unwrap().unwrap();
        assert_eq!(final_order.status, OrderStatus::PartiallyFilled);
        assert_eq!(final_order.filled_quantity, dec!(0));
    }

    #[tokio::test]
    async fn cancel_removes_order_from_book_and_marks_ledger_cancelled() {
        let (engine, ledger, _queue, book) = engine();
        let order = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(order.clone()).await.unwrap();

        engine.process_cancel(order.order_id).await.unwrap();

        assert!(!book.has_order(order.order_id));
        let final_order = ledger.get_order(order.order_id).await.unwrap().unwrap();
        assert_eq!(final_order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_racing_a_fill_is_a_no_op_success() {
        // Once the order is gone from the book (filled by a prior job), a
        // cancel that arrives afterward is a no-op, not an error —
        // distinct from Intake::cancel's synchronous Conflict, which only
        // fires before the cancel job is ever enqueued.
        let (engine, ledger, _queue, _book) = engine();
        let maker = ledger.insert_open_order(&limit(Side::Sell, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(maker.clone()).await.unwrap();
        let taker = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(taker.clone()).await.unwrap();

        engine.process_cancel(maker.order_id).await.unwrap();

        let maker_final = ledger.get_order(maker.order_id).await.unwrap().unwrap();
        assert_eq!(maker_final.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn price_time_priority_fills_oldest_order_first() {
        let (engine, ledger, _queue, _book) = engine();
        let first_maker = ledger.insert_open_order(&limit(Side::Sell, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(first_maker.clone()).await.unwrap();
        let second_maker = ledger.insert_open_order(&limit(Side::Sell, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(second_maker.clone()).await.unwrap();

        let taker = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(taker.clone()).await.unwrap();

        let first_final = ledger.get_order(first_maker.order_id).await.unwrap().unwrap();
        let second_final = ledger.get_order(second_maker.order_id).await.unwrap().unwrap();
        assert_eq!(first_final.status, OrderStatus::Filled);
        assert_eq!(second_final.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn market_taker_sweeps_two_price_levels_in_fifo_order() {
        // sell 0.3 @ t0, sell 0.4 @ t1, then a buy-market for 0.5 should
        // take 0.3 from the first seller (filled) and 0.2 from the second
        // (partially_filled, 0.2 left).
        let (engine, ledger, _queue, book) = engine();
        let first = ledger.insert_open_order(&limit(Side::Sell, dec!(70100), dec!(0.3))).await.unwrap();
        engine.process_submit(first.clone()).await.unwrap();
        let second = ledger.insert_open_order(&limit(Side::Sell, dec!(70100), dec!(0.4))).await.unwrap();
        engine.process_submit(second.clone()).await.unwrap();

        let taker = ledger.insert_open_order(&market(Side::Buy, dec!(0.5))).await.unwrap();
        engine.process_submit(taker.clone()).await.unwrap();

        let first_final = ledger.get_order(first.order_id).await.unwrap().unwrap();
        let second_final = ledger.get_order(second.order_id).await.unwrap().unwrap();
        let taker_final = ledger.get_order(taker.order_id).await.unwrap().unwrap();
        assert_eq!(first_final.status, OrderStatus::Filled);
        assert_eq!(second_final.status, OrderStatus::PartiallyFilled);
        assert_eq!(second_final.filled_quantity, dec!(0.2));
        assert_eq!(taker_final.status, OrderStatus::Filled);
        assert_eq!(book.fetch(second.order_id).unwrap().remaining, dec!(0.2));

        let trades = ledger.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 2);
    }

    #[tokio::test]
    async fn cancel_after_partial_fill_preserves_accumulated_filled_quantity() {
        // buy-limit 70000 x 1.0, sell-market 0.4 trades against it
        // leaving the buyer partially_filled at 0.4, then a cancel must
        // land as `cancelled` with filled_quantity = 0.4 and remove the
        // 70000 level entirely.
        let (engine, ledger, _queue, book) = engine();
        let buyer = ledger.insert_open_order(&limit(Side::Buy, dec!(70000), dec!(1))).await.unwrap();
        engine.process_submit(buyer.clone()).await.unwrap();

        let seller = ledger.insert_open_order(&market(Side::Sell, dec!(0.4))).await.unwrap();
        engine.process_submit(seller.clone()).await.unwrap();

        let buyer_mid = ledger.get_order(buyer.order_id).await.unwrap().unwrap();
        assert_eq!(buyer_mid.status, OrderStatus::PartiallyFilled);
        assert_eq!(buyer_mid.filled_quantity, dec!(0.4));

        engine.process_cancel(buyer.order_id).await.unwrap();

        let buyer_final = ledger.get_order(buyer.order_id).await.unwrap().unwrap();
        assert_eq!(buyer_final.status, OrderStatus::Cancelled);
        assert_eq!(buyer_final.filled_quantity, dec!(0.4));
        assert_eq!(book.best_price(Side::Buy), None);
    }

    #[tokio::test]
    async fn limit_taker_never_trades_through_its_limit_price() {
        // A buy-limit taker must never pay more than its own limit, even
        // though the resting ask is priced below it — the trade executes
        // at the maker's (better) price, never the taker's.
        let (engine, ledger, _queue, _book) = engine();
        let maker = ledger.insert_open_order(&limit(Side::Sell, dec!(99), dec!(1))).await.unwrap();
        engine.process_submit(maker.clone()).await.unwrap();

        let taker = ledger.insert_open_order(&limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();
        engine.process_submit(taker.clone()).await.unwrap();

        let trades = ledger.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, dec!(99));
        assert!(trades[0].price <= dec!(100));
    }
}
