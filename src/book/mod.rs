//! In-memory order book: the matching engine's fast projection over open
//! resting orders. Never the source of truth — the ledger is — and must
//! never fall out of sync with it: every book mutation happens only after
//! the corresponding ledger write is durable. The engine, not this
//! module, enforces that ordering; this module only provides the
//! primitive operations it is built from.
//!
//! A `BTreeMap` per side under a lock gives O(log P) best-price lookup;
//! a side index (`DashMap`) gives O(1) lookup/cancel by order id.
//! `rust_decimal::Decimal` implements `Ord` directly, so the map key is
//! the price itself, and best-bid/best-ask reads come from the two ends
//! of one `BTreeMap` rather than two oppositely-ordered ones.

use crate::models::Side;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RestingOrder {
    pub order_id: Uuid,
    pub client_id: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining: Decimal,
}

type Levels = BTreeMap<Decimal, VecDeque<Uuid>>;

pub struct OrderBook {
    instrument: String,
    bids: RwLock<Levels>,
    asks: RwLock<Levels>,
    resting: DashMap<Uuid, RestingOrder>,
}

impl OrderBook {
    pub fn new(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            bids: RwLock::new(BTreeMap::new()),
            asks: RwLock::new(BTreeMap::new()),
            resting: DashMap::new(),
        }
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    fn side_map(&self, side: Side) -> &RwLock<Levels> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Best resting price on `side`: highest bid, lowest ask.
    pub fn best_price(&self, side: Side) -> Option<Decimal> {
        let map = self.side_map(side).read();
        match side {
            Side::Buy => map.keys().next_back().copied(),
            Side::Sell => map.keys().next().copied(),
        }
    }

    /// Best resting price on the side an incoming order of `taker_side`
    /// would cross against.
    pub fn best_opposite(&self, taker_side: Side) -> Option<Decimal> {
        self.best_price(taker_side.opposite())
    }

    pub fn fetch(&self, order_id: Uuid) -> Option<RestingOrder> {
        self.resting.get(&order_id).map(|r| r.clone())
    }

    /// Inserts a brand-new resting order at the back of its price level —
    /// price-time priority means later arrival is later priority.
    pub fn append_at(&self, order: RestingOrder) {
        let side = order.side;
        let price = order.price;
        let order_id = order.order_id;
        self.resting.insert(order_id, order);
        self.side_map(side)
            .write()
            .entry(price)
            .or_default()
            .push_back(order_id);
    }

    /// Pops the oldest order id resting at `(side, price)`, removing the
    /// level if it becomes empty. Leaves the resting-order map untouched —
    /// callers finish the order's lifecycle with `take`, `push_front_at`,
    /// or (implicitly) `reduce`.
    pub fn pop_oldest_at(&self, side: Side, price: Decimal) -> Option<Uuid> {
        let mut map = self.side_map(side).write();
        let queue = map.get_mut(&price)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            map.remove(&price);
        }
        id
    }

    /// Restores an order to the front of its level, preserving its
    /// original time priority — used when a maker survives a match with
    /// quantity remaining.
    pub fn push_front_at(&self, side: Side, price: Decimal, order_id: Uuid) {
        self.side_map(side)
            .write()
            .entry(price)
            .or_default()
            .push_front(order_id);
    }

    /// Applies a fill to a resting order's remaining quantity in place.
    /// Returns the new remaining quantity, or `None` if the order was not
    /// found (an orphan — present in a level's queue but absent from the
    /// resting map; the engine surfaces this as a warning, not a panic).
    pub fn reduce(&self, order_id: Uuid, fill_qty: Decimal) -> Option<Decimal> {
        let mut entry = self.resting.get_mut(&order_id)?;
        entry.remaining -= fill_qty;
        Some(entry.remaining)
    }

    /// Removes an order from the resting map only (the level queue entry
    /// must already have been popped via `pop_oldest_at`). Used when a
    /// maker is fully filled.
    pub fn take(&self, order_id: Uuid) -> Option<RestingOrder> {
        self.resting.remove(&order_id).map(|(_, v)| v)
    }

    /// Cancels an order wherever it sits within its level's queue. O(level
    /// depth): cancellation is not this book's optimized path.
    pub fn remove(&self, order_id: Uuid) -> Option<RestingOrder> {
        let resting = self.resting.remove(&order_id).map(|(_, v)| v)?;
        let mut map = self.side_map(resting.side).write();
        if let Some(queue) = map.get_mut(&resting.price) {
            queue.retain(|id| *id != order_id);
            if queue.is_empty() {
                map.remove(&resting.price);
            }
        }
        Some(resting)
    }

    /// Aggregated depth for `side`, best price first, bounded to
    /// `levels` price points.
    pub fn depth(&self, side: Side, levels: usize) -> Vec<(Decimal, Decimal)> {
        let map = self.side_map(side).read();
        let prices: Vec<Decimal> = match side {
            Side::Buy => map.keys().rev().take(levels).copied().collect(),
            Side::Sell => map.keys().take(levels).copied().collect(),
        };
        prices
            .into_iter()
            .map(|price| {
                let total: Decimal = map[&price]
                    .iter()
                    .filter_map(|id| self.resting.get(id).map(|r| r.remaining))
                    .sum();
                (price, total)
            })
            .collect()
    }

    /// Total remaining quantity resting at `(side, price)`, 0 if the level
    /// is absent. Used to emit orderbook-delta events after a mutation.
    pub fn level_total(&self, side: Side, price: Decimal) -> Decimal {
        let map = self.side_map(side).read();
        match map.get(&price) {
            Some(queue) => queue
                .iter()
                .filter_map(|id| self.resting.get(id).map(|r| r.remaining))
                .sum(),
            None => Decimal::ZERO,
        }
    }

    pub fn order_count(&self) -> usize {
        self.resting.len()
    }

    pub fn has_order(&self, order_id: Uuid) -> bool {
        self.resting.contains_key(&order_id)
    }
}
