//! Market data layer.
//!
//! Defines the `PriceFeed` trait plus the live CoinGecko implementation,
//! the signal adapter that keeps gameplay supplied with a usable reading
//! at all times, and the background poll task.

pub mod adapter;
pub mod coingecko;
pub mod poller;

use anyhow::Result;
use async_trait::async_trait;

/// A raw spot-price reading from an external feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    /// Spot price in the configured quote currency.
    pub price: f64,
    /// 24-hour percentage change, e.g. -2.5 for a 2.5% drop.
    pub change_24h_pct: f64,
}

/// Abstraction over external spot-price sources.
///
/// Implementations fetch the current price and 24h change for a single
/// configured asset. Failures are ordinary errors here; the
/// `SignalAdapter` absorbs them into the fallback path so gameplay
/// never sees them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Fetch the current quote for the configured asset.
    async fn fetch_quote(&self) -> Result<PriceQuote>;

    /// Short identifier for logs and error messages.
    fn source_name(&self) -> &str;
}
