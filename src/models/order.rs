use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Limit,
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// Order status. `Pending` is deliberately absent: Intake inserts orders
/// directly as `Open` — there is no separate not-yet-persisted state
/// visible outside the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Terminal statuses are monotone: once reached, they never change.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::PartiallyFilled => write!(f, "partially_filled"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
            OrderStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// An order as persisted in the ledger — the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub order_id: Uuid,
    pub client_id: String,
    pub instrument: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Absent iff `order_type == Market`.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }
}

/// The validated submission payload Intake accepts: a sum type over limit
/// and market orders, so the matching engine branches on its tag rather
/// than on a `price.is_some()` check scattered everywhere.
#[derive(Debug, Clone, Deserialize)]
pub struct Submission {
    pub client_id: String,
    pub instrument: String,
    pub side: Side,
    pub idempotency_key: String,
    pub kind: SubmissionKind,
}

#[derive(Debug, Clone, Deserialize)]
pub enum SubmissionKind {
    Limit { price: Decimal, quantity: Decimal },
    Market { quantity: Decimal },
}

impl SubmissionKind {
    pub fn order_type(&self) -> OrderType {
        match self {
            SubmissionKind::Limit { .. } => OrderType::Limit,
            SubmissionKind::Market { .. } => OrderType::Market,
        }
    }

    pub fn price(&self) -> Option<Decimal> {
        match self {
            SubmissionKind::Limit { price, .. } => Some(*price),
            SubmissionKind::Market { .. } => None,
        }
    }

    pub fn quantity(&self) -> Decimal {
        match self {
            SubmissionKind::Limit { quantity, .. } => *quantity,
            SubmissionKind::Market { quantity } => *quantity,
        }
    }
}
