//! Signal adapter — the always-available market reading.
//!
//! Holds the latest `MarketSignal` for synchronous consumption by the
//! round engine. Live fetch results replace the cached value wholesale;
//! failures are absorbed by synthesizing a bounded jitter of the last
//! known price, so consumers never see an error and never wait.
//!
//! Also maintains the short/long EMA pair used for the trend signal and
//! the multiplier climb rate.

use anyhow::Result;
use rand::Rng;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::MarketConfig;
use crate::types::{MarketSignal, Trend};

use super::PriceQuote;

/// Recent samples retained for the dashboard sparkline.
const RECENT_SAMPLES: usize = 30;

pub struct SignalAdapter {
    latest: MarketSignal,
    ema_short: Option<f64>,
    ema_long: Option<f64>,
    alpha_short: f64,
    alpha_long: f64,
    trend_threshold: f64,
    fallback_jitter_pct: f64,
    recent: VecDeque<MarketSignal>,
    live_refreshes: u64,
    fallback_refreshes: u64,
}

impl SignalAdapter {
    /// Build an adapter seeded with a safe default signal, so the first
    /// synchronous read is valid before any fetch completes.
    pub fn new(cfg: &MarketConfig) -> Self {
        Self {
            latest: MarketSignal::safe_default(cfg.default_price),
            ema_short: None,
            ema_long: None,
            alpha_short: ema_alpha(cfg.ema_short_period),
            alpha_long: ema_alpha(cfg.ema_long_period),
            trend_threshold: cfg.trend_threshold,
            fallback_jitter_pct: cfg.fallback_jitter_pct,
            recent: VecDeque::with_capacity(RECENT_SAMPLES),
            live_refreshes: 0,
            fallback_refreshes: 0,
        }
    }

    /// Absorb one poll outcome. Success stores a live signal; any failure
    /// (network, malformed payload, unusable values) synthesizes a
    /// fallback instead. Never returns an error.
    pub fn apply<R: Rng>(&mut self, outcome: Result<PriceQuote>, rng: &mut R) {
        let signal = match outcome {
            Ok(quote) => {
                let candidate = MarketSignal::live(quote.price, quote.change_24h_pct);
                if candidate.is_usable() {
                    self.live_refreshes += 1;
                    candidate
                } else {
                    warn!(price = quote.price, "Unusable quote, synthesizing fallback");
                    self.synthesize(rng)
                }
            }
            Err(e) => {
                debug!(error = %e, "Feed refresh failed, synthesizing fallback");
                self.synthesize(rng)
            }
        };

        self.update_emas(signal.price);
        if self.recent.len() == RECENT_SAMPLES {
            self.recent.pop_front();
        }
        self.recent.push_back(signal.clone());
        self.latest = signal;
    }

    /// Jitter the last known price within the configured bound, carrying
    /// the previous 24h change so volatility stays continuous.
    fn synthesize<R: Rng>(&mut self, rng: &mut R) -> MarketSignal {
        self.fallback_refreshes += 1;
        let jitter = (rng.random::<f64>() - 0.5) * 2.0 * self.fallback_jitter_pct;
        let price = (self.latest.price * (1.0 + jitter)).max(f64::MIN_POSITIVE);
        MarketSignal::fallback(price, self.latest.change_24h_pct)
    }

    fn update_emas(&mut self, price: f64) {
        self.ema_short = Some(match self.ema_short {
            Some(prev) => self.alpha_short * price + (1.0 - self.alpha_short) * prev,
            None => price,
        });
        self.ema_long = Some(match self.ema_long {
            Some(prev) => self.alpha_long * price + (1.0 - self.alpha_long) * prev,
            None => price,
        });
    }

    /// Latest cached signal. Always valid, never blocks.
    pub fn latest(&self) -> &MarketSignal {
        &self.latest
    }

    /// Owned copy of the latest signal, for round-start snapshots.
    pub fn snapshot(&self) -> MarketSignal {
        self.latest.clone()
    }

    /// Short EMA, falling back to the current price before any sample.
    pub fn ema_short(&self) -> f64 {
        self.ema_short.unwrap_or(self.latest.price)
    }

    /// Long EMA, falling back to the current price before any sample.
    pub fn ema_long(&self) -> f64 {
        self.ema_long.unwrap_or(self.latest.price)
    }

    /// Relative gap between the EMAs: (short - long) / max(1, long).
    pub fn ema_gap(&self) -> f64 {
        let long = self.ema_long();
        (self.ema_short() - long) / long.max(1.0)
    }

    /// Trend classification against the configured EMA band.
    pub fn trend(&self) -> Trend {
        let short = self.ema_short();
        let long = self.ema_long();
        if short > long * (1.0 + self.trend_threshold) {
            Trend::Bullish
        } else if short < long * (1.0 - self.trend_threshold) {
            Trend::Bearish
        } else {
            Trend::Sideways
        }
    }

    /// Whether the current reading is synthesized (degraded source).
    pub fn degraded(&self) -> bool {
        !self.latest.is_live()
    }

    /// Recent signals, oldest first.
    pub fn recent(&self) -> Vec<MarketSignal> {
        self.recent.iter().cloned().collect()
    }

    pub fn live_refreshes(&self) -> u64 {
        self.live_refreshes
    }

    pub fn fallback_refreshes(&self) -> u64 {
        self.fallback_refreshes
    }
}

/// Standard EMA smoothing factor for an N-sample period.
fn ema_alpha(period: u32) -> f64 {
    2.0 / (period.max(1) as f64 + 1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
