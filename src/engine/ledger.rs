//! Wager ledger — stakes, cash-outs, and payouts.
//!
//! Tracks every wager bound to the session's rounds and enforces the
//! resolution rules: one terminal status per wager, auto-cashout paid at
//! its threshold, loss resolution idempotent, and an early-exit penalty
//! below the penalty-free line.
//!
//! Amounts and payouts are `Decimal`; multipliers stay `f64` and are
//! converted at the payout boundary.

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::WagerConfig;
use crate::types::{GameError, Round, Wager, WagerStatus};

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Payout rules applied at cash-out time.
#[derive(Debug, Clone)]
pub struct WagerRules {
    /// Penalty fraction for cashing out below the penalty-free line.
    pub early_exit_penalty: Decimal,
    /// Multiplier at or above which no penalty applies.
    pub penalty_free_multiplier: f64,
    /// Smallest accepted stake.
    pub min_amount: Decimal,
}

impl Default for WagerRules {
    fn default() -> Self {
        Self {
            early_exit_penalty: Decimal::new(1, 2), // 1%
            penalty_free_multiplier: 1.2,
            min_amount: Decimal::new(1, 4), // 0.0001
        }
    }
}

impl WagerRules {
    pub fn from_config(cfg: &WagerConfig) -> Self {
        let defaults = Self::default();
        Self {
            early_exit_penalty: Decimal::from_f64(cfg.early_exit_penalty)
                .unwrap_or(defaults.early_exit_penalty),
            penalty_free_multiplier: cfg.penalty_free_multiplier,
            min_amount: Decimal::from_f64(cfg.min_amount).unwrap_or(defaults.min_amount),
        }
    }

    /// Total return for a stake resolved at the given multiplier:
    /// amount x multiplier, minus the early-exit penalty when below the
    /// penalty-free line.
    pub fn payout(&self, amount: Decimal, multiplier: f64) -> Decimal {
        let factor = Decimal::from_f64(multiplier).unwrap_or(Decimal::ONE);
        let gross = amount * factor;
        if multiplier < self.penalty_free_multiplier {
            gross * (Decimal::ONE - self.early_exit_penalty)
        } else {
            gross
        }
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Per-round aggregate used for summaries and stats.
#[derive(Debug, Clone, Default)]
pub struct RoundTotals {
    pub placed: u64,
    pub cashed_out: u64,
    pub lost: u64,
    pub staked: Decimal,
    pub paid_out: Decimal,
}

pub struct WagerLedger {
    rules: WagerRules,
    wagers: Vec<Wager>,
}

impl WagerLedger {
    pub fn new(rules: WagerRules) -> Self {
        Self {
            rules,
            wagers: Vec::new(),
        }
    }

    pub fn rules(&self) -> &WagerRules {
        &self.rules
    }

    /// Place a stake into the given round.
    ///
    /// Rejected with `InvalidState` outside the Pending/Flying window,
    /// `InvalidAmount` for non-positive or sub-minimum stakes, and
    /// `InvalidThreshold` for auto-cashout levels at or below 1.0.
    /// No partial state is created on rejection.
    pub fn place(
        &mut self,
        round: &Round,
        amount: Decimal,
        auto_cashout: Option<f64>,
    ) -> Result<Uuid, GameError> {
        if !round.accepts_wagers() {
            return Err(GameError::InvalidState {
                round_id: round.id,
                status: round.status,
                expected: "Pending or Flying",
            });
        }
        if amount <= Decimal::ZERO || amount < self.rules.min_amount {
            return Err(GameError::InvalidAmount(amount));
        }
        if let Some(threshold) = auto_cashout {
            if !threshold.is_finite() || threshold <= 1.0 {
                return Err(GameError::InvalidThreshold(threshold));
            }
        }

        let wager = Wager::new(round.id, amount, auto_cashout);
        let id = wager.id;
        info!(
            wager_id = %id,
            round_id = round.id,
            amount = %amount,
            auto_cashout = ?auto_cashout,
            "Wager placed"
        );
        self.wagers.push(wager);
        Ok(id)
    }

    /// User-triggered cash-out at the round's current multiplier.
    ///
    /// Fails with `NotActive` if the wager is already resolved, belongs
    /// to a superseded round, or the round has crashed.
    pub fn cash_out(&mut self, wager_id: Uuid, round: &Round) -> Result<Decimal, GameError> {
        let rules = self.rules.clone();
        let wager = self
            .wagers
            .iter_mut()
            .find(|w| w.id == wager_id)
            .ok_or(GameError::WagerNotFound(wager_id))?;

        if !wager.is_active() || wager.round_id != round.id || round.is_crashed() {
            return Err(GameError::NotActive(wager_id));
        }

        let payout = Self::resolve_cashed_out(wager, round.multiplier, &rules);
        Ok(payout)
    }

    /// Resolve every active wager whose auto-cashout threshold has been
    /// reached, paying the threshold itself. Called each tick before the
    /// crash evaluation so an auto-cashout can still win on the crashing
    /// tick. Returns the resolved (id, payout) pairs.
    pub fn run_auto_cashouts(&mut self, round: &Round) -> Vec<(Uuid, Decimal)> {
        let rules = self.rules.clone();
        let mut resolved = Vec::new();
        for wager in self
            .wagers
            .iter_mut()
            .filter(|w| w.is_active() && w.round_id == round.id)
        {
            if let Some(threshold) = wager.auto_cashout {
                if threshold <= round.multiplier {
                    let payout = Self::resolve_cashed_out(wager, threshold, &rules);
                    resolved.push((wager.id, payout));
                }
            }
        }
        resolved
    }

    /// Cash out every active wager of the round at the current
    /// multiplier (early-stop forfeit). Returns the resolved pairs.
    pub fn cash_out_all(&mut self, round: &Round) -> Vec<(Uuid, Decimal)> {
        let rules = self.rules.clone();
        let mut resolved = Vec::new();
        for wager in self
            .wagers
            .iter_mut()
            .filter(|w| w.is_active() && w.round_id == round.id)
        {
            let payout = Self::resolve_cashed_out(wager, round.multiplier, &rules);
            resolved.push((wager.id, payout));
        }
        resolved
    }

    /// Resolve every still-active wager of the round to `Lost` with zero
    /// payout. Idempotent: already-resolved wagers are untouched, and a
    /// repeat invocation resolves nothing. Returns how many wagers were
    /// newly lost.
    pub fn resolve_round_lost(&mut self, round_id: u64) -> u64 {
        let mut lost = 0;
        for wager in self
            .wagers
            .iter_mut()
            .filter(|w| w.is_active() && w.round_id == round_id)
        {
            wager.status = WagerStatus::Lost;
            wager.payout = Decimal::ZERO;
            wager.resolved_at = Some(Utc::now());
            debug!(wager_id = %wager.id, round_id, "Wager lost");
            lost += 1;
        }
        lost
    }

    fn resolve_cashed_out(wager: &mut Wager, multiplier: f64, rules: &WagerRules) -> Decimal {
        let payout = rules.payout(wager.amount, multiplier);
        wager.status = WagerStatus::CashedOut;
        wager.payout = payout;
        wager.resolved_at_multiplier = Some(multiplier);
        wager.resolved_at = Some(Utc::now());
        info!(
            wager_id = %wager.id,
            round_id = wager.round_id,
            multiplier,
            payout = %payout,
            "Wager cashed out"
        );
        payout
    }

    pub fn wager(&self, wager_id: Uuid) -> Option<&Wager> {
        self.wagers.iter().find(|w| w.id == wager_id)
    }

    /// Active wagers bound to the given round.
    pub fn active_for_round(&self, round_id: u64) -> Vec<&Wager> {
        self.wagers
            .iter()
            .filter(|w| w.is_active() && w.round_id == round_id)
            .collect()
    }

    /// Most recently resolved wagers, newest last.
    pub fn recent_resolved(&self, limit: usize) -> Vec<Wager> {
        let resolved: Vec<&Wager> = self.wagers.iter().filter(|w| w.is_resolved()).collect();
        let start = resolved.len().saturating_sub(limit);
        resolved[start..].iter().map(|w| (*w).clone()).collect()
    }

    /// Aggregate placement/resolution totals for a round.
    pub fn round_totals(&self, round_id: u64) -> RoundTotals {
        let mut totals = RoundTotals::default();
        for wager in self.wagers.iter().filter(|w| w.round_id == round_id) {
            totals.placed += 1;
            totals.staked += wager.amount;
            match wager.status {
                WagerStatus::CashedOut => {
                    totals.cashed_out += 1;
                    totals.paid_out += wager.payout;
                }
                WagerStatus::Lost => totals.lost += 1,
                WagerStatus::Active => {}
            }
        }
        totals
    }

    /// Drop resolved wagers from superseded rounds, keeping the ledger
    /// bounded over a long session.
    pub fn prune_before(&mut self, round_id: u64) {
        self.wagers
            .retain(|w| w.round_id >= round_id || w.is_active());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
