//! Configuration surface.
//!
//! Loaded from `.env` via `dotenvy`, then the `config` crate layered over
//! process environment. Carries the enumerated tuning knobs plus the
//! connection strings the persistence layer needs.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

/// `queue_concurrency` is always 1 — not a tunable of correctness — and is
/// therefore a constant, not a `Config` field: nothing in this crate can
/// construct a second consumer.
pub const QUEUE_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,

    /// The single fixed instrument this core instance matches.
    pub instrument: String,

    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    #[serde(default = "default_match_epsilon", with = "decimal_as_str")]
    pub match_epsilon: Decimal,

    #[serde(default = "default_price_levels")]
    pub price_levels_default: usize,

    #[serde(default = "default_recent_trades")]
    pub recent_trades_default: usize,
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_match_epsilon() -> Decimal {
    dec!(0.00000001)
}

fn default_price_levels() -> usize {
    20
}

fn default_recent_trades() -> usize {
    50
}

mod decimal_as_str {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Decimal::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Load configuration from `.env` plus the process environment.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .set_default("idempotency_ttl_seconds", 86_400i64)?
            .set_default("match_epsilon", "0.00000001")?
            .set_default("price_levels_default", 20i64)?
            .set_default("recent_trades_default", 50i64)?
            .add_source(config::Environment::default().try_parsing(true));

        let cfg = builder.build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Construct directly, bypassing the environment — used by tests and
    /// by callers embedding this crate as a library with their own
    /// configuration story.
    pub fn for_instrument(instrument: impl Into<String>) -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            instrument: instrument.into(),
            idempotency_ttl_seconds: default_idempotency_ttl_seconds(),
            match_epsilon: default_match_epsilon(),
            price_levels_default: default_price_levels(),
            recent_trades_default: default_recent_trades(),
        }
    }
}
