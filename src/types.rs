//! Shared types for the BLOCKFLIGHT simulator.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that market, engine, and
//! dashboard modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Market signal
// ---------------------------------------------------------------------------

/// Where a market signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSource {
    /// Fetched from the live price feed.
    Live,
    /// Synthesized locally after a feed failure.
    Fallback,
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::Live => write!(f, "live"),
            SignalSource::Fallback => write!(f, "fallback"),
        }
    }
}

/// Trend classification derived from the short/long EMA pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
    Sideways,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Sideways => write!(f, "sideways"),
        }
    }
}

/// A single observed (or synthesized) market reading.
///
/// Replaced wholesale on each refresh; consumers read the latest value
/// synchronously and never wait on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSignal {
    /// Spot price in the configured quote currency.
    pub price: f64,
    /// 24-hour percentage change, e.g. -2.5 for a 2.5% drop.
    pub change_24h_pct: f64,
    /// Derived volatility: |change_24h_pct| / 100.
    pub volatility: f64,
    pub observed_at: DateTime<Utc>,
    pub source: SignalSource,
}

impl MarketSignal {
    /// Build a live signal from a raw quote, deriving volatility.
    pub fn live(price: f64, change_24h_pct: f64) -> Self {
        Self {
            price,
            change_24h_pct,
            volatility: change_24h_pct.abs() / 100.0,
            observed_at: Utc::now(),
            source: SignalSource::Live,
        }
    }

    /// Build a synthesized fallback signal.
    pub fn fallback(price: f64, change_24h_pct: f64) -> Self {
        Self {
            price,
            change_24h_pct,
            volatility: change_24h_pct.abs() / 100.0,
            observed_at: Utc::now(),
            source: SignalSource::Fallback,
        }
    }

    /// Safe default used before any refresh has happened: zero volatility,
    /// flat trend, marked as fallback. Gameplay must never block on this.
    pub fn safe_default(price: f64) -> Self {
        Self {
            price,
            change_24h_pct: 0.0,
            volatility: 0.0,
            observed_at: Utc::now(),
            source: SignalSource::Fallback,
        }
    }

    /// Whether the reading came from the live feed.
    pub fn is_live(&self) -> bool {
        self.source == SignalSource::Live
    }

    /// A signal is usable if its price is finite and positive and its
    /// volatility is a finite non-negative fraction.
    pub fn is_usable(&self) -> bool {
        self.price.is_finite()
            && self.price > 0.0
            && self.volatility.is_finite()
            && self.volatility >= 0.0
    }
}

impl fmt::Display for MarketSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${:.2} ({:+.2}% 24h, vol {:.2}%) [{}]",
            self.price,
            self.change_24h_pct,
            self.volatility * 100.0,
            self.source,
        )
    }
}

// ---------------------------------------------------------------------------
// Round
// ---------------------------------------------------------------------------

/// Round lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Countdown before launch.
    Pending,
    /// Multiplier rising.
    Flying,
    /// Terminal. A new round supersedes this one after an intermission.
    Crashed,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Pending => write!(f, "PENDING"),
            RoundStatus::Flying => write!(f, "FLYING"),
            RoundStatus::Crashed => write!(f, "CRASHED"),
        }
    }
}

/// One play cycle from launch to crash.
///
/// Mutated every tick while `Flying`; immutable once `Crashed`
/// (`crash_multiplier` is write-once).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    /// Monotonically increasing per session.
    pub id: u64,
    pub started_at: DateTime<Utc>,
    /// Signal snapshot captured at launch, for relative-change math.
    pub start_signal: MarketSignal,
    /// Current payout factor. Always >= 1.0, non-decreasing until crash.
    pub multiplier: f64,
    pub status: RoundStatus,
    /// Final multiplier, set exactly once on crash.
    pub crash_multiplier: Option<f64>,
}

impl Round {
    /// Create a fresh round in `Pending` with the given launch snapshot.
    pub fn new(id: u64, start_signal: MarketSignal) -> Self {
        Self {
            id,
            started_at: Utc::now(),
            start_signal,
            multiplier: 1.0,
            status: RoundStatus::Pending,
            crash_multiplier: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == RoundStatus::Pending
    }

    pub fn is_flying(&self) -> bool {
        self.status == RoundStatus::Flying
    }

    pub fn is_crashed(&self) -> bool {
        self.status == RoundStatus::Crashed
    }

    /// Whether a wager may currently be bound to this round.
    pub fn accepts_wagers(&self) -> bool {
        matches!(self.status, RoundStatus::Pending | RoundStatus::Flying)
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.crash_multiplier {
            Some(m) => write!(f, "Round #{} [{}] crashed @{m:.2}x", self.id, self.status),
            None => write!(f, "Round #{} [{}] {:.2}x", self.id, self.status, self.multiplier),
        }
    }
}

/// Terminal record of a finished round, kept in the session history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Final multiplier reached, whether crashed or forfeited.
    pub final_multiplier: f64,
    /// Set iff the round ended in a crash.
    pub crash_multiplier: Option<f64>,
    pub ticks: u64,
    pub wagers_placed: u64,
    pub wagers_cashed_out: u64,
    pub wagers_lost: u64,
    pub total_staked: Decimal,
    pub total_paid_out: Decimal,
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self.crash_multiplier {
            Some(m) => format!("crashed @{m:.2}x"),
            None => format!("retired @{:.2}x", self.final_multiplier),
        };
        write!(
            f,
            "Round #{}: {} after {} ticks | wagers {} (cashed {}/lost {}) | staked {} paid {}",
            self.id,
            outcome,
            self.ticks,
            self.wagers_placed,
            self.wagers_cashed_out,
            self.wagers_lost,
            self.total_staked,
            self.total_paid_out,
        )
    }
}

// ---------------------------------------------------------------------------
// Wager
// ---------------------------------------------------------------------------

/// Wager lifecycle status. `CashedOut` and `Lost` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WagerStatus {
    Active,
    CashedOut,
    Lost,
}

impl fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WagerStatus::Active => write!(f, "ACTIVE"),
            WagerStatus::CashedOut => write!(f, "CASHED_OUT"),
            WagerStatus::Lost => write!(f, "LOST"),
        }
    }
}

/// A stake bound to a single round.
///
/// Reaches exactly one terminal status; loss resolution is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: Uuid,
    pub round_id: u64,
    pub amount: Decimal,
    /// Wagers always enter at the base of the curve.
    pub placed_at_multiplier: f64,
    /// Optional self-resolving threshold (> 1.0).
    pub auto_cashout: Option<f64>,
    pub status: WagerStatus,
    /// Total return (stake included). Zero until cashed out.
    pub payout: Decimal,
    /// Multiplier at which the wager resolved.
    pub resolved_at_multiplier: Option<f64>,
    pub placed_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Wager {
    pub fn new(round_id: u64, amount: Decimal, auto_cashout: Option<f64>) -> Self {
        Self {
            id: Uuid::new_v4(),
            round_id,
            amount,
            placed_at_multiplier: 1.0,
            auto_cashout,
            status: WagerStatus::Active,
            payout: Decimal::ZERO,
            resolved_at_multiplier: None,
            placed_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WagerStatus::Active
    }

    pub fn is_resolved(&self) -> bool {
        !self.is_active()
    }

    /// Net result against the stake (payout - amount). Negative for losses.
    pub fn net(&self) -> Decimal {
        self.payout - self.amount
    }
}

impl fmt::Display for Wager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wager {} on round #{}: {} [{}]",
            self.id, self.round_id, self.amount, self.status,
        )?;
        if let Some(m) = self.resolved_at_multiplier {
            write!(f, " @{m:.2}x payout {}", self.payout)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session stats
// ---------------------------------------------------------------------------

/// Running totals for a simulator session, persisted across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub rounds_played: u64,
    pub rounds_crashed: u64,
    pub wagers_placed: u64,
    pub wagers_cashed_out: u64,
    pub wagers_lost: u64,
    pub total_staked: Decimal,
    pub total_paid_out: Decimal,
}

impl SessionStats {
    /// Fraction of resolved wagers that cashed out. 0.0 if none resolved.
    pub fn cashout_rate(&self) -> f64 {
        let resolved = self.wagers_cashed_out + self.wagers_lost;
        if resolved == 0 {
            0.0
        } else {
            self.wagers_cashed_out as f64 / resolved as f64
        }
    }

    /// House take so far (staked - paid out).
    pub fn house_net(&self) -> Decimal {
        self.total_staked - self.total_paid_out
    }
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rounds={} (crashed {}) | wagers={} (cashed {}/lost {}) | staked={} paid={} | cashout_rate={:.1}%",
            self.rounds_played,
            self.rounds_crashed,
            self.wagers_placed,
            self.wagers_cashed_out,
            self.wagers_lost,
            self.total_staked,
            self.total_paid_out,
            self.cashout_rate() * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for BLOCKFLIGHT.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Invalid state: round #{round_id} is {status}, expected {expected}")]
    InvalidState {
        round_id: u64,
        status: RoundStatus,
        expected: &'static str,
    },

    #[error("Invalid wager amount: {0} (must be positive)")]
    InvalidAmount(Decimal),

    #[error("Invalid auto-cashout threshold: {0:.2} (must exceed 1.0)")]
    InvalidThreshold(f64),

    #[error("Wager {0} is not active")]
    NotActive(Uuid),

    #[error("Wager not found: {0}")]
    WagerNotFound(Uuid),

    #[error("Feed error ({source_name}): {message}")]
    Feed { source_name: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
