//! Round state machine and crash math.
//!
//! Drives a single round through `Pending` -> `Flying` -> `Crashed`,
//! advancing the multiplier every tick and evaluating the stochastic
//! crash condition. All the varying constants of the prototype variants
//! live in `RoundParams` so one engine covers every mode.
//!
//! Elapsed time is derived from the tick counter rather than the wall
//! clock, so a seeded RNG makes a round fully deterministic.

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use crate::types::{GameError, MarketSignal, Round, RoundStatus, Trend};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Multiplier-climb and crash-probability parameters.
#[derive(Debug, Clone)]
pub struct RoundParams {
    /// Flat multiplier gain per tick.
    pub base_increment: f64,
    /// Extra gain per unit of signal volatility.
    pub volatility_gain: f64,
    /// Extra gain per unit of relative EMA gap (uptrends climb faster).
    pub trend_gain: f64,
    /// Full width of the uniform per-tick jitter on the increment.
    pub increment_jitter: f64,
    /// Baseline per-tick crash probability.
    pub base_crash_probability: f64,
    /// Scales volatility into the crash-risk factor.
    pub volatility_risk_gain: f64,
    /// Cap on the volatility contribution to the risk factor.
    pub volatility_factor_cap: f64,
    /// Multiplicative penalty applied while the EMA trend is bearish.
    pub downtrend_penalty: f64,
    /// Divisor of the quadratic multiplier-risk term.
    pub multiplier_risk_divisor: f64,
    /// Seconds over which the elapsed-time factor doubles.
    pub time_ramp_secs: f64,
    /// Hard ceiling on per-tick crash probability.
    pub max_crash_probability: f64,
    /// No crash can fire at or below this multiplier.
    pub min_crash_multiplier: f64,
}

impl Default for RoundParams {
    fn default() -> Self {
        Self {
            base_increment: 0.006,
            volatility_gain: 0.8,
            trend_gain: 0.5,
            increment_jitter: 0.004,
            base_crash_probability: 0.01,
            volatility_risk_gain: 50.0,
            volatility_factor_cap: 3.0,
            downtrend_penalty: 1.2,
            multiplier_risk_divisor: 25.0,
            time_ramp_secs: 60.0,
            max_crash_probability: 0.35,
            min_crash_multiplier: 1.05,
        }
    }
}

impl RoundParams {
    /// Largest possible single-tick increment for a given signal regime.
    /// Useful as an analytic ceiling on multiplier growth.
    pub fn max_increment(&self, volatility: f64, ema_gap: f64) -> f64 {
        self.base_increment
            + volatility * self.volatility_gain
            + ema_gap.max(0.0) * self.trend_gain
            + self.increment_jitter / 2.0
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RoundEngine {
    params: RoundParams,
    tick_interval: Duration,
    round: Round,
    ticks: u64,
}

impl RoundEngine {
    pub fn new(params: RoundParams, tick_interval: Duration, round: Round) -> Self {
        Self {
            params,
            tick_interval,
            round,
            ticks: 0,
        }
    }

    pub fn round(&self) -> &Round {
        &self.round
    }

    pub fn params(&self) -> &RoundParams {
        &self.params
    }

    /// Ticks elapsed since launch.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Flight time derived from the tick counter.
    pub fn elapsed_secs(&self) -> f64 {
        self.ticks as f64 * self.tick_interval.as_secs_f64()
    }

    /// Replace the current round with a fresh `Pending` one.
    /// The superseded round's tick counter is reset with it.
    pub fn reset(&mut self, round: Round) {
        self.round = round;
        self.ticks = 0;
    }

    /// Launch: `Pending` -> `Flying`, snapshotting the given signal for
    /// later relative-change math.
    pub fn launch(&mut self, start_signal: MarketSignal) -> Result<(), GameError> {
        if !self.round.is_pending() {
            return Err(GameError::InvalidState {
                round_id: self.round.id,
                status: self.round.status,
                expected: "Pending",
            });
        }
        self.round.start_signal = start_signal;
        self.round.started_at = chrono::Utc::now();
        self.round.status = RoundStatus::Flying;
        self.ticks = 0;
        debug!(round_id = self.round.id, "Round launched");
        Ok(())
    }

    /// Advance the multiplier by one tick and return the new value.
    ///
    /// The increment is the base constant plus volatility and trend terms
    /// plus bounded uniform jitter; the result is clamped so the
    /// multiplier never decreases and never drops below 1.0. A no-op
    /// (returning the current value) unless the round is flying.
    pub fn advance_multiplier<R: Rng>(
        &mut self,
        signal: &MarketSignal,
        ema_gap: f64,
        rng: &mut R,
    ) -> f64 {
        if !self.round.is_flying() {
            return self.round.multiplier;
        }

        self.ticks += 1;

        let increment = self.params.base_increment
            + signal.volatility * self.params.volatility_gain
            + ema_gap * self.params.trend_gain;
        let jitter = (rng.random::<f64>() - 0.5) * self.params.increment_jitter;

        let candidate = self.round.multiplier + increment + jitter;
        let next = candidate.max(self.round.multiplier).max(1.0);
        self.round.multiplier = next;
        next
    }

    /// Instantaneous crash probability for the current tick.
    ///
    /// base x volatility-factor x trend-penalty x time-factor, plus a
    /// quadratic term in (multiplier - 1), clamped to the configured max.
    pub fn crash_probability(&self, signal: &MarketSignal, trend: Trend) -> f64 {
        let p = &self.params;

        let vol_factor = 1.0 + (signal.volatility * p.volatility_risk_gain).min(p.volatility_factor_cap);
        let trend_penalty = if trend == Trend::Bearish {
            p.downtrend_penalty
        } else {
            1.0
        };
        let time_factor = 1.0 + self.elapsed_secs() / p.time_ramp_secs;
        let mult_risk =
            (self.round.multiplier - 1.0).max(0.0).powi(2) / p.multiplier_risk_divisor;

        (p.base_crash_probability * vol_factor * trend_penalty * time_factor + mult_risk)
            .min(p.max_crash_probability)
    }

    /// Draw against the crash probability. On a hit (and only above the
    /// minimum crash guard) the round transitions to `Crashed`, freezing
    /// `crash_multiplier` exactly once. Returns whether the crash fired.
    pub fn evaluate_crash<R: Rng>(
        &mut self,
        signal: &MarketSignal,
        trend: Trend,
        rng: &mut R,
    ) -> bool {
        if !self.round.is_flying() {
            return false;
        }
        if self.round.multiplier <= self.params.min_crash_multiplier {
            return false;
        }

        let probability = self.crash_probability(signal, trend);
        if rng.random::<f64>() < probability {
            self.round.status = RoundStatus::Crashed;
            // Write-once: never reassigned after the first crash.
            self.round
                .crash_multiplier
                .get_or_insert(self.round.multiplier);
            debug!(
                round_id = self.round.id,
                multiplier = self.round.multiplier,
                probability,
                "Round crashed"
            );
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn flying_engine(params: RoundParams) -> RoundEngine {
        let mut engine = RoundEngine::new(
            params,
            Duration::from_millis(100),
            Round::new(1, MarketSignal::safe_default(3500.0)),
        );
        engine.launch(MarketSignal::safe_default(3500.0)).unwrap();
        engine
    }

    fn signal(volatility_pct: f64) -> MarketSignal {
        // volatility = |change| / 100
        MarketSignal::live(3500.0, volatility_pct * 100.0)
    }

    #[test]
    fn test_params_default() {
        let p = RoundParams::default();
        assert_eq!(p.base_increment, 0.006);
        assert_eq!(p.base_crash_probability, 0.01);
        assert_eq!(p.max_crash_probability, 0.35);
        assert_eq!(p.min_crash_multiplier, 1.05);
    }

    #[test]
    fn test_launch_transitions_pending_to_flying() {
        let mut engine = RoundEngine::new(
            RoundParams::default(),
            Duration::from_millis(100),
            Round::new(1, MarketSignal::safe_default(3500.0)),
        );
        assert!(engine.round().is_pending());

        let start = MarketSignal::live(3600.0, 2.0);
        engine.launch(start).unwrap();
        assert!(engine.round().is_flying());
        assert_eq!(engine.round().start_signal.price, 3600.0);
        assert_eq!(engine.ticks(), 0);
    }

    #[test]
    fn test_launch_rejected_when_not_pending() {
        let mut engine = flying_engine(RoundParams::default());
        let err = engine.launch(MarketSignal::safe_default(3500.0)).unwrap_err();
        assert!(matches!(err, GameError::InvalidState { .. }));
    }

    #[test]
    fn test_multiplier_monotonically_non_decreasing() {
        let mut engine = flying_engine(RoundParams::default());
        let mut rng = StdRng::seed_from_u64(42);
        let sig = signal(0.02);

        let mut prev = engine.round().multiplier;
        for _ in 0..200 {
            let next = engine.advance_multiplier(&sig, 0.0, &mut rng);
            assert!(next >= prev, "multiplier decreased: {next} < {prev}");
            assert!(next >= 1.0);
            prev = next;
        }
    }

    #[test]
    fn test_multiplier_clamped_against_negative_trend() {
        // A strongly negative EMA gap would push the increment negative;
        // the clamp keeps the multiplier flat instead of falling.
        let mut engine = flying_engine(RoundParams::default());
        let mut rng = StdRng::seed_from_u64(42);
        let sig = signal(0.0);

        let first = engine.advance_multiplier(&sig, -0.5, &mut rng);
        let second = engine.advance_multiplier(&sig, -0.5, &mut rng);
        assert!(first >= 1.0);
        assert!(second >= first);
    }

    #[test]
    fn test_fifty_tick_ceiling() {
        // Sideways market, volatility 0.02: growth stays under the
        // analytic ceiling of 1 + 50 * max_increment.
        let params = RoundParams::default();
        let mut engine = flying_engine(params.clone());
        let mut rng = StdRng::seed_from_u64(7);
        let sig = signal(0.02);

        for _ in 0..50 {
            engine.advance_multiplier(&sig, 0.0, &mut rng);
        }

        let ceiling = 1.0 + 50.0 * params.max_increment(0.02, 0.0);
        assert!(engine.round().multiplier > 1.0);
        assert!(
            engine.round().multiplier < ceiling,
            "multiplier {} exceeded ceiling {ceiling}",
            engine.round().multiplier
        );
    }

    #[test]
    fn test_advance_is_noop_when_not_flying() {
        let mut engine = RoundEngine::new(
            RoundParams::default(),
            Duration::from_millis(100),
            Round::new(1, MarketSignal::safe_default(3500.0)),
        );
        let mut rng = StdRng::seed_from_u64(1);
        let before = engine.round().multiplier;
        let after = engine.advance_multiplier(&signal(0.05), 0.0, &mut rng);
        assert_eq!(before, after);
        assert_eq!(engine.ticks(), 0);
    }

    #[test]
    fn test_crash_probability_known_inputs() {
        // tick 0, multiplier 1.0, sideways, vol 0.02:
        // p = 0.01 * (1 + min(3, 0.02*50)) * 1.0 * 1.0 + 0 = 0.02
        let engine = flying_engine(RoundParams::default());
        let p = engine.crash_probability(&signal(0.02), Trend::Sideways);
        assert!((p - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_crash_probability_downtrend_penalty() {
        let engine = flying_engine(RoundParams::default());
        let sideways = engine.crash_probability(&signal(0.02), Trend::Sideways);
        let bearish = engine.crash_probability(&signal(0.02), Trend::Bearish);
        assert!((bearish - sideways * 1.2).abs() < 1e-12);
        // Bullish gets no penalty.
        let bullish = engine.crash_probability(&signal(0.02), Trend::Bullish);
        assert_eq!(bullish, sideways);
    }

    #[test]
    fn test_crash_probability_volatility_factor_capped() {
        let engine = flying_engine(RoundParams::default());
        // vol 0.5 * 50 = 25, capped at 3 => factor 4.
        let p = engine.crash_probability(&signal(0.5), Trend::Sideways);
        assert!((p - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_crash_probability_grows_with_time() {
        let mut engine = flying_engine(RoundParams::default());
        let mut rng = StdRng::seed_from_u64(9);
        let sig = signal(0.0);

        let p0 = engine.crash_probability(&sig, Trend::Sideways);
        for _ in 0..100 {
            engine.advance_multiplier(&sig, 0.0, &mut rng);
        }
        let p100 = engine.crash_probability(&sig, Trend::Sideways);
        assert!(p100 > p0);
    }

    #[test]
    fn test_crash_probability_clamped_at_max() {
        let mut engine = flying_engine(RoundParams::default());
        // Inflate the multiplier so the quadratic term dominates.
        let mut rng = StdRng::seed_from_u64(11);
        let sig = signal(0.1);
        for _ in 0..2000 {
            engine.advance_multiplier(&sig, 0.05, &mut rng);
        }
        let p = engine.crash_probability(&sig, Trend::Bearish);
        assert!(p <= 0.35 + 1e-12);
    }

    #[test]
    fn test_no_crash_below_guard() {
        // Certain crash probability, but the multiplier is still below
        // the guard, so the draw never happens.
        let params = RoundParams {
            base_crash_probability: 1.0,
            max_crash_probability: 1.0,
            ..Default::default()
        };
        let mut engine = flying_engine(params);
        let mut rng = StdRng::seed_from_u64(5);
        let sig = signal(0.0);

        // One tick of base increment leaves us well under 1.05.
        engine.advance_multiplier(&sig, 0.0, &mut rng);
        assert!(engine.round().multiplier <= 1.05);
        assert!(!engine.evaluate_crash(&sig, Trend::Sideways, &mut rng));
        assert!(engine.round().is_flying());
    }

    #[test]
    fn test_certain_crash_above_guard() {
        let params = RoundParams {
            base_crash_probability: 1.0,
            max_crash_probability: 1.0,
            base_increment: 0.1,
            ..Default::default()
        };
        let mut engine = flying_engine(params);
        let mut rng = StdRng::seed_from_u64(5);
        let sig = signal(0.0);

        while engine.round().multiplier <= 1.05 {
            engine.advance_multiplier(&sig, 0.0, &mut rng);
        }

        assert!(engine.evaluate_crash(&sig, Trend::Sideways, &mut rng));
        let round = engine.round();
        assert!(round.is_crashed());
        assert_eq!(round.crash_multiplier, Some(round.multiplier));
        assert!(round.crash_multiplier.unwrap() > 1.05);
    }

    #[test]
    fn test_crash_multiplier_write_once() {
        let params = RoundParams {
            base_crash_probability: 1.0,
            max_crash_probability: 1.0,
            base_increment: 0.1,
            ..Default::default()
        };
        let mut engine = flying_engine(params);
        let mut rng = StdRng::seed_from_u64(5);
        let sig = signal(0.0);

        for _ in 0..3 {
            engine.advance_multiplier(&sig, 0.0, &mut rng);
        }
        assert!(engine.evaluate_crash(&sig, Trend::Sideways, &mut rng));
        let frozen = engine.round().crash_multiplier;

        // Repeated evaluation is a no-op on a crashed round.
        assert!(!engine.evaluate_crash(&sig, Trend::Sideways, &mut rng));
        assert_eq!(engine.round().crash_multiplier, frozen);

        // And advancing no longer moves the multiplier.
        let m = engine.advance_multiplier(&sig, 0.0, &mut rng);
        assert_eq!(Some(m), frozen);
    }

    #[test]
    fn test_zero_probability_never_crashes() {
        let params = RoundParams {
            base_crash_probability: 0.0,
            multiplier_risk_divisor: f64::INFINITY,
            ..Default::default()
        };
        let mut engine = flying_engine(params);
        let mut rng = StdRng::seed_from_u64(17);
        let sig = signal(0.02);

        for _ in 0..500 {
            engine.advance_multiplier(&sig, 0.0, &mut rng);
            assert!(!engine.evaluate_crash(&sig, Trend::Sideways, &mut rng));
        }
        assert!(engine.round().is_flying());
    }

    #[test]
    fn test_reset_replaces_round() {
        let mut engine = flying_engine(RoundParams::default());
        let mut rng = StdRng::seed_from_u64(1);
        engine.advance_multiplier(&signal(0.02), 0.0, &mut rng);
        assert!(engine.ticks() > 0);

        engine.reset(Round::new(2, MarketSignal::safe_default(3500.0)));
        assert_eq!(engine.round().id, 2);
        assert!(engine.round().is_pending());
        assert_eq!(engine.ticks(), 0);
        assert_eq!(engine.round().multiplier, 1.0);
    }

    #[test]
    fn test_elapsed_secs_from_ticks() {
        let mut engine = flying_engine(RoundParams::default());
        let mut rng = StdRng::seed_from_u64(1);
        let sig = signal(0.0);
        for _ in 0..50 {
            engine.advance_multiplier(&sig, 0.0, &mut rng);
        }
        assert!((engine.elapsed_secs() - 5.0).abs() < 1e-12);
    }
}
