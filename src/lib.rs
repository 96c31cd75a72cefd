//! `lob_matching_core`: a single-instrument limit order book matching
//! engine core — ledger, book, idempotency gate, intake, and matching
//! engine, assembled behind one facade (`Core`).
//!
//! The five components are independent modules; `Core` wires concrete
//! adapters to them and exposes the external interface: submit, cancel,
//! query, and subscribe to the event stream.

pub mod book;
pub mod cache;
pub mod config;
pub mod matching;
pub mod error;
pub mod idempotency;
pub mod intake;
pub mod ledger;
pub mod models;
pub mod queue;

use book::OrderBook;
use config::Config;
use matching::{CoreEvent, Engine};
use error::{CoreError, CoreResult};
use idempotency::IdempotencyStore;
use intake::Intake;
use ledger::LedgerStore;
use models::{Order, Side, Submission, Trade};
use queue::JobQueue;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// One price level in an `OrderbookSnapshot`. `cumulative` is the running
/// sum of `quantity` within the returned window, best price first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
    pub cumulative: Decimal,
}

/// Snapshot of resting depth for one instrument, bounded to a number of
/// price levels per side. Asks ascend by price, bids descend; empty
/// levels are never present (`OrderBook::depth` only returns occupied
/// price points).
#[derive(Debug, Clone)]
pub struct OrderbookSnapshot {
    pub instrument: String,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
}

fn with_cumulative(levels: Vec<(Decimal, Decimal)>) -> Vec<OrderbookLevel> {
    let mut running = Decimal::ZERO;
    levels
        .into_iter()
        .map(|(price, quantity)| {
            running += quantity;
            OrderbookLevel {
                price,
                quantity,
                cumulative: running,
            }
        })
        .collect()
}

/// Assembles the five components behind one external interface. Generic
/// over the store traits so embedders can swap in their own adapters;
/// `lob_matching_core::ledger::pg::PgLedger` /
/// `lob_matching_core::idempotency::redis_store::RedisIdempotencyStore` /
/// `lob_matching_core::queue::pg::PgJobQueue` are the production ones.
pub struct Core<L: LedgerStore, I: IdempotencyStore, Q: JobQueue> {
    ledger: Arc<L>,
    book: Arc<OrderBook>,
    intake: Intake<L, I, Q>,
    engine: Arc<Engine<L, Q>>,
    events: broadcast::Sender<CoreEvent>,
    config: Config,
    book_ready: std::sync::atomic::AtomicBool,
}

impl<L: LedgerStore + 'static, I: IdempotencyStore + 'static, Q: JobQueue + 'static> Core<L, I, Q> {
    pub fn new(config: Config, ledger: Arc<L>, idempotency: Arc<I>, queue: Arc<Q>) -> Self {
        let book = Arc::new(OrderBook::new(config.instrument.clone()));
        let (events, _rx) = broadcast::channel(1024);

        let intake = Intake::new(
            ledger.clone(),
            idempotency,
            queue.clone(),
            config.idempotency_ttl_seconds,
        );
        let engine = Arc::new(Engine::new(
            ledger.clone(),
            queue,
            book.clone(),
            events.clone(),
            config.match_epsilon,
        ));

        Self {
            ledger,
            book,
            intake,
            engine,
            events,
            config,
            book_ready: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Spawns the matching engine's single-consumer loop. Returns the
    /// `JoinHandle` so the caller can observe if it ever exits (it should
    /// not, outside of queue shutdown).
    pub fn spawn_engine(&self) -> tokio::task::JoinHandle<CoreResult<()>> {
        let engine = self.engine.clone();
        tokio::spawn(async move { engine.run().await })
    }

    /// Marks the book as reconstructed and safe to serve reads from.
    /// Required after any process restart: the book is an in-memory
    /// projection, and this crate does not implement replay-from-ledger
    /// recovery — an embedder must either rebuild the book out of band
    /// before calling this, or accept serving an empty book for a fresh
    /// instrument.
    pub fn mark_book_ready(&self) {
        self.book_ready.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn book_ready(&self) -> bool {
        self.book_ready.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Refuses new submissions until the book is known-authoritative
    /// (`mark_book_ready`) — this crate does not implement ledger-replay
    /// reconstruction, so a freshly-started process must either start
    /// from an empty ledger or have its book rebuilt out of band before
    /// it is safe to match against.
    fn require_book_ready(&self) -> CoreResult<()> {
        if self.book_ready() {
            Ok(())
        } else {
            Err(CoreError::Invariant(
                "book not ready: call mark_book_ready() after reconstruction".into(),
            ))
        }
    }

    pub async fn submit(&self, submission: Submission) -> CoreResult<Order> {
        self.require_book_ready()?;
        self.intake.submit(submission).await
    }

    pub async fn cancel(&self, order_id: Uuid) -> CoreResult<()> {
        self.require_book_ready()?;
        self.intake.cancel(order_id).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> CoreResult<Option<Order>> {
        self.ledger.get_order(order_id).await
    }

    pub async fn recent_trades(&self, limit: Option<usize>) -> CoreResult<Vec<Trade>> {
        self.ledger
            .recent_trades(limit.unwrap_or(self.config.recent_trades_default))
            .await
    }

    pub async fn detailed_trades(&self, limit: Option<usize>) -> CoreResult<Vec<models::DetailedTrade>> {
        self.ledger
            .detailed_trades(limit.unwrap_or(self.config.recent_trades_default))
            .await
    }

    /// Orderbook depth snapshot. Bids and asks come back best-price-first.
    /// Empty if `book_ready()` is false and the process just restarted —
    /// callers should check that before trusting a snapshot.
    pub fn order_book(&self, levels: Option<usize>) -> OrderbookSnapshot {
        let levels = levels.unwrap_or(self.config.price_levels_default);
        OrderbookSnapshot {
            instrument: self.config.instrument.clone(),
            bids: with_cumulative(self.book.depth(Side::Buy, levels)),
            asks: with_cumulative(self.book.depth(Side::Sell, levels)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Re-exported so callers matching on terminal order state don't need to
/// reach into `models` separately.
pub use models::OrderType;

#[cfg(test)]
mod tests {
    use super::*;
    use idempotency::memory::InMemoryIdempotencyStore;
    use ledger::memory::InMemoryLedger;
    use models::{OrderStatus, SubmissionKind};
    use queue::memory::InMemoryJobQueue;
    use rust_decimal_macros::dec;

    fn core() -> Core<InMemoryLedger, InMemoryIdempotencyStore, InMemoryJobQueue> {
        let config = Config::for_instrument("BTC-USD");
        Core::new(
            config,
            Arc::new(InMemoryLedger::new()),
            Arc::new(InMemoryIdempotencyStore::new()),
            Arc::new(InMemoryJobQueue::new()),
        )
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

    #[tokio::test]
    async fn end_to_end_submit_match_and_observe_trade() {
        let core = core();
        core.mark_book_ready();
        let _engine = core.spawn_engine();
        let mut events = core.subscribe();

        let maker = core.submit(limit(Side::Sell, dec!(100), dec!(1))).await.unwrap();
        let taker = core.submit(limit(Side::Buy, dec!(100), dec!(1))).await.unwrap();

        let mut saw_trade = false;
        for _ in 0..8 {
            match tokio::time::timeout(std::time::Duration::from_millis(200), events.recv()).await {
                Ok(Ok(CoreEvent::Trade { buy_order_id, sell_order_id, .. })) => {
                    assert_eq!(buy_order_id, taker.order_id);
                    assert_eq!(sell_order_id, maker.order_id);
                    saw_trade = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_trade, "expected a Trade event on the broadcast stream");

        let snapshot = core.order_book(None);
        assert!(snapshot.bids.is_empty());
        assert!(snapshot.asks.is_empty());
    }

    #[tokio::test]
    async fn order_book_snapshot_carries_a_running_cumulative_sum() {
        let core = core();
        core.mark_book_ready();
        let _engine = core.spawn_engine();

        core.submit(limit(Side::Buy, dec!(99), dec!(1))).await.unwrap();
        core.submit(limit(Side::Buy, dec!(100), dec!(2))).await.unwrap();

        let mut snapshot = core.order_book(None);
        for _ in 0..8 {
            if snapshot.bids.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            snapshot = core.order_book(None);
        }

        assert_eq!(snapshot.bids.len(), 2);
        assert_eq!(snapshot.bids[0].price, dec!(100));
        assert_eq!(snapshot.bids[0].cumulative, dec!(2));
        assert_eq!(snapshot.bids[1].price, dec!(99));
        assert_eq!(snapshot.bids[1].cumulative, dec!(3));
    }

    #[tokio::test]
    async fn book_is_not_ready_until_marked() {
        let core = core();
        assert!(!core.book_ready());
        core.mark_book_ready();
        assert!(core.book_ready());
    }

    #[tokio::test]
    async fn submit_is_refused_while_book_is_not_ready() {
        let core = core();
        let result = core.submit(limit(Side::Buy, dec!(100), dec!(1))).await;
        assert!(matches!(result, Err(CoreError::Invariant(_))));
    }

    #[tokio::test]
    async fn cancel_resolves_through_the_engine() {
        let core = core();
        core.mark_book_ready();
        let _engine = core.spawn_engine();

        let order = core.submit(limit(Side::Buy, dec!(99), dec!(1))).await.unwrap();
        core.cancel(order.order_id).await.unwrap();

        let mut cancelled_observed = false;
        for _ in 0..8 {
            let fetched = core.get_order(order.order_id).await.unwrap().unwrap();
            if fetched.status == OrderStatus::Cancelled {
                cancelled_observed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(cancelled_observed);
    }
}
