//! Game session — the explicit simulation context.
//!
//! Owns the signal adapter, round engine, wager ledger, RNG, round
//! history, and running stats. All state mutation happens inside the
//! synchronous stepping API (`step_tick`, `apply_quote`, wager calls);
//! the async layer drives these from a single select! loop, so nothing
//! here needs a lock.
//!
//! Replaces the module-level singletons of the prototypes with a
//! constructed object and an explicit `start`/`stop` lifecycle.

use anyhow::Result;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::market::adapter::SignalAdapter;
use crate::market::PriceQuote;
use crate::types::{
    GameError, MarketSignal, Round, RoundStatus, RoundSummary, SessionStats, Trend, Wager,
};

use super::ledger::{WagerLedger, WagerRules};
use super::round::{RoundEngine, RoundParams};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What happened during one tick (or an explicit user action).
/// Returned to the caller for logging and dashboard mirroring.
#[derive(Debug, Clone)]
pub enum RoundEvent {
    Launched {
        round_id: u64,
    },
    Ticked {
        round_id: u64,
        multiplier: f64,
        crash_probability: f64,
    },
    WagerCashedOut {
        wager_id: Uuid,
        payout: Decimal,
        at_multiplier: f64,
    },
    Crashed {
        round_id: u64,
        crash_multiplier: f64,
        wagers_lost: u64,
    },
    /// Round retired early without a crash (forfeit).
    Retired {
        round_id: u64,
        final_multiplier: f64,
    },
    RoundCreated {
        round_id: u64,
    },
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the session for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub round_id: u64,
    pub status: RoundStatus,
    pub multiplier: f64,
    pub crash_probability: f64,
    /// Seconds until launch (Pending) or the next round (Crashed).
    pub phase_remaining_secs: f64,
    pub signal: MarketSignal,
    pub ema_short: f64,
    pub ema_long: f64,
    pub trend: Trend,
    pub degraded: bool,
    pub active_wagers: usize,
    pub stats: SessionStats,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct GameSession {
    name: String,
    adapter: SignalAdapter,
    engine: RoundEngine,
    ledger: WagerLedger,
    rng: StdRng,
    tick_interval: Duration,
    countdown_ticks: u64,
    intermission_ticks: u64,
    /// Ticks spent in the current Pending or Crashed phase.
    phase_ticks: u64,
    history: VecDeque<RoundSummary>,
    history_limit: usize,
    stats: SessionStats,
    next_round_id: u64,
    running: bool,
}

impl GameSession {
    /// Build a session from configuration, seeding the RNG from the
    /// configured env var when set (deterministic replays) or OS entropy
    /// otherwise.
    pub fn new(cfg: &AppConfig) -> Self {
        let params = RoundParams {
            max_crash_probability: cfg.round.max_crash_probability,
            min_crash_multiplier: cfg.round.min_crash_multiplier,
            ..Default::default()
        };
        let rng = match cfg
            .session
            .rng_seed_env
            .as_deref()
            .and_then(|env| std::env::var(env).ok())
            .and_then(|raw| raw.parse::<u64>().ok())
        {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self::with_parts(cfg, params, rng)
    }

    /// Build with explicit round parameters and RNG. The seam for
    /// deterministic tests and for an injected authoritative randomness
    /// source.
    pub fn with_parts(cfg: &AppConfig, params: RoundParams, rng: StdRng) -> Self {
        let tick_interval = Duration::from_millis(cfg.round.tick_interval_ms.max(1));
        let adapter = SignalAdapter::new(&cfg.market);
        let first_round = Round::new(1, adapter.snapshot());

        Self {
            name: cfg.session.name.clone(),
            engine: RoundEngine::new(params, tick_interval, first_round),
            ledger: WagerLedger::new(WagerRules::from_config(&cfg.wager)),
            adapter,
            rng,
            tick_interval,
            countdown_ticks: ticks_for(cfg.round.countdown_secs, cfg.round.tick_interval_ms),
            intermission_ticks: ticks_for(cfg.round.intermission_secs, cfg.round.tick_interval_ms),
            phase_ticks: 0,
            history: VecDeque::new(),
            history_limit: cfg.session.history_limit.max(1),
            stats: SessionStats::default(),
            next_round_id: 1,
            running: false,
        }
    }

    /// Seed stats and history from a persisted record, continuing the
    /// round id sequence. Call before `start`.
    pub fn restore(&mut self, stats: SessionStats, rounds: Vec<RoundSummary>) {
        let max_id = rounds.iter().map(|r| r.id).max().unwrap_or(0);
        self.stats = stats;
        self.history = rounds.into_iter().collect();
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        if max_id >= self.next_round_id {
            self.next_round_id = max_id + 1;
            self.engine
                .reset(Round::new(self.next_round_id, self.adapter.snapshot()));
        }
    }

    /// Begin ticking. The first round's countdown starts now.
    pub fn start(&mut self) {
        self.running = true;
        self.phase_ticks = 0;
        info!(
            session = %self.name,
            round_id = self.engine.round().id,
            "Session started"
        );
    }

    /// Stop ticking. Idempotent; callers tear down their timers and the
    /// feed poller alongside.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            info!(session = %self.name, stats = %self.stats, "Session stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Absorb one feed poll outcome into the signal adapter.
    pub fn apply_quote(&mut self, outcome: Result<PriceQuote>) {
        self.adapter.apply(outcome, &mut self.rng);
    }

    /// Advance the simulation by one tick.
    ///
    /// While flying, the per-tick order is fixed: multiplier advance,
    /// then auto-cashouts, then the crash draw — so an auto-cashout can
    /// still win on the crashing tick.
    pub fn step_tick(&mut self) -> Vec<RoundEvent> {
        if !self.running {
            return Vec::new();
        }

        let mut events = Vec::new();
        match self.engine.round().status {
            RoundStatus::Pending => {
                self.phase_ticks += 1;
                if self.phase_ticks >= self.countdown_ticks {
                    self.launch_round(&mut events);
                }
            }
            RoundStatus::Flying => self.tick_flight(&mut events),
            RoundStatus::Crashed => {
                self.phase_ticks += 1;
                if self.phase_ticks >= self.intermission_ticks {
                    self.phase_ticks = 0;
                    events.push(self.rotate_round());
                }
            }
        }
        events
    }

    /// Launch the pending round immediately (user action), skipping the
    /// rest of the countdown.
    pub fn launch_now(&mut self) -> Result<(), GameError> {
        let mut events = Vec::new();
        self.launch_round(&mut events);
        if events.is_empty() {
            Err(GameError::InvalidState {
                round_id: self.engine.round().id,
                status: self.engine.round().status,
                expected: "Pending",
            })
        } else {
            Ok(())
        }
    }

    fn launch_round(&mut self, events: &mut Vec<RoundEvent>) {
        self.phase_ticks = 0;
        let snapshot = self.adapter.snapshot();
        if self.engine.launch(snapshot).is_ok() {
            info!(round_id = self.engine.round().id, "Round launched");
            events.push(RoundEvent::Launched {
                round_id: self.engine.round().id,
            });
        }
    }

    fn tick_flight(&mut self, events: &mut Vec<RoundEvent>) {
        let signal = self.adapter.snapshot();
        let ema_gap = self.adapter.ema_gap();
        let trend = self.adapter.trend();

        let multiplier = self.engine.advance_multiplier(&signal, ema_gap, &mut self.rng);

        // Auto-cashout strictly precedes the crash draw within a tick.
        for (wager_id, payout) in self.ledger.run_auto_cashouts(self.engine.round()) {
            self.stats.wagers_cashed_out += 1;
            self.stats.total_paid_out += payout;
            let at_multiplier = self
                .ledger
                .wager(wager_id)
                .and_then(|w| w.resolved_at_multiplier)
                .unwrap_or(multiplier);
            events.push(RoundEvent::WagerCashedOut {
                wager_id,
                payout,
                at_multiplier,
            });
        }

        let crash_probability = self.engine.crash_probability(&signal, trend);
        if self.engine.evaluate_crash(&signal, trend, &mut self.rng) {
            let round_id = self.engine.round().id;
            let crash_multiplier = self.engine.round().crash_multiplier.unwrap_or(multiplier);
            let wagers_lost = self.ledger.resolve_round_lost(round_id);
            self.stats.wagers_lost += wagers_lost;
            self.stats.rounds_played += 1;
            self.stats.rounds_crashed += 1;
            self.record_summary();
            self.phase_ticks = 0;
            info!(
                round_id,
                crash_multiplier = format!("{crash_multiplier:.4}"),
                wagers_lost,
                "Round crashed"
            );
            events.push(RoundEvent::Crashed {
                round_id,
                crash_multiplier,
                wagers_lost,
            });
        } else {
            events.push(RoundEvent::Ticked {
                round_id: self.engine.round().id,
                multiplier,
                crash_probability,
            });
        }
    }

    /// Stake into the current round.
    pub fn place_wager(
        &mut self,
        amount: Decimal,
        auto_cashout: Option<f64>,
    ) -> Result<Uuid, GameError> {
        let id = self.ledger.place(self.engine.round(), amount, auto_cashout)?;
        self.stats.wagers_placed += 1;
        self.stats.total_staked += amount;
        Ok(id)
    }

    /// Cash a wager out at the current multiplier.
    pub fn cash_out(&mut self, wager_id: Uuid) -> Result<Decimal, GameError> {
        let payout = self.ledger.cash_out(wager_id, self.engine.round())?;
        self.stats.wagers_cashed_out += 1;
        self.stats.total_paid_out += payout;
        Ok(payout)
    }

    /// Early stop: forfeit further multiplier growth without a crash.
    /// Active wagers cash out at the current multiplier, the round is
    /// retired into history un-crashed, and a fresh round begins.
    pub fn forfeit(&mut self) -> Vec<RoundEvent> {
        let mut events = Vec::new();
        if !self.engine.round().is_flying() {
            return events;
        }

        let final_multiplier = self.engine.round().multiplier;
        for (wager_id, payout) in self.ledger.cash_out_all(self.engine.round()) {
            self.stats.wagers_cashed_out += 1;
            self.stats.total_paid_out += payout;
            events.push(RoundEvent::WagerCashedOut {
                wager_id,
                payout,
                at_multiplier: final_multiplier,
            });
        }

        let round_id = self.engine.round().id;
        self.stats.rounds_played += 1;
        self.record_summary();
        self.phase_ticks = 0;
        info!(
            round_id,
            final_multiplier = format!("{final_multiplier:.4}"),
            "Round retired early"
        );
        events.push(RoundEvent::Retired {
            round_id,
            final_multiplier,
        });
        events.push(self.rotate_round());
        events
    }

    fn rotate_round(&mut self) -> RoundEvent {
        self.next_round_id += 1;
        let id = self.next_round_id;
        // Resolved wagers from rounds that fell out of the history ring
        // are no longer observable; drop them.
        self.ledger
            .prune_before(id.saturating_sub(self.history_limit as u64));
        self.engine.reset(Round::new(id, self.adapter.snapshot()));
        RoundEvent::RoundCreated { round_id: id }
    }

    fn record_summary(&mut self) {
        let round = self.engine.round();
        let totals = self.ledger.round_totals(round.id);
        let summary = RoundSummary {
            id: round.id,
            started_at: round.started_at,
            ended_at: Utc::now(),
            final_multiplier: round.multiplier,
            crash_multiplier: round.crash_multiplier,
            ticks: self.engine.ticks(),
            wagers_placed: totals.placed,
            wagers_cashed_out: totals.cashed_out,
            wagers_lost: totals.lost,
            total_staked: totals.staked,
            total_paid_out: totals.paid_out,
        };
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    // -- accessors ---------------------------------------------------------

    pub fn round(&self) -> &Round {
        self.engine.round()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn history(&self) -> impl Iterator<Item = &RoundSummary> {
        self.history.iter()
    }

    pub fn adapter(&self) -> &SignalAdapter {
        &self.adapter
    }

    pub fn wager(&self, wager_id: Uuid) -> Option<&Wager> {
        self.ledger.wager(wager_id)
    }

    pub fn recent_resolved_wagers(&self, limit: usize) -> Vec<Wager> {
        self.ledger.recent_resolved(limit)
    }

    /// Point-in-time view for the dashboard.
    pub fn snapshot(&self) -> SessionSnapshot {
        let round = self.engine.round();
        let signal = self.adapter.snapshot();
        let trend = self.adapter.trend();
        let phase_remaining_ticks = match round.status {
            RoundStatus::Pending => self.countdown_ticks.saturating_sub(self.phase_ticks),
            RoundStatus::Crashed => self.intermission_ticks.saturating_sub(self.phase_ticks),
            RoundStatus::Flying => 0,
        };

        SessionSnapshot {
            name: self.name.clone(),
            round_id: round.id,
            status: round.status,
            multiplier: round.multiplier,
            crash_probability: if round.is_flying() {
                self.engine.crash_probability(&signal, trend)
            } else {
                0.0
            },
            phase_remaining_secs: phase_remaining_ticks as f64 * self.tick_interval.as_secs_f64(),
            ema_short: self.adapter.ema_short(),
            ema_long: self.adapter.ema_long(),
            trend,
            degraded: self.adapter.degraded(),
            active_wagers: self.ledger.active_for_round(round.id).len(),
            signal,
            stats: self.stats.clone(),
        }
    }
}

/// Whole ticks covering `secs` at the given tick interval, at least one.
fn ticks_for(secs: u64, tick_interval_ms: u64) -> u64 {
    (secs * 1000 / tick_interval_ms.max(1)).max(1)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
