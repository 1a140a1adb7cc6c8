//! End-to-end deterministic simulations.
//!
//! Drives full sessions through the synchronous stepping API with a
//! seeded RNG, and checks the async feed plumbing against the mock feed.

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

use blockflight::config::{
    AppConfig, AutoplayConfig, DashboardConfig, MarketConfig, RoundConfig, SessionConfig,
    WagerConfig,
};
use blockflight::engine::round::RoundParams;
use blockflight::engine::session::{GameSession, RoundEvent};
use blockflight::market::poller::spawn_poller;
use blockflight::market::PriceQuote;
use blockflight::storage::{self, SessionRecord};
use blockflight::types::{GameError, SignalSource, WagerStatus};

use crate::mock_feed::MockFeed;

fn test_config() -> AppConfig {
    AppConfig {
        session: SessionConfig {
            name: "sim-test".into(),
            history_limit: 20,
            state_file: "sim_test_state.json".into(),
            rng_seed_env: None,
        },
        market: MarketConfig {
            asset_id: "ethereum".into(),
            vs_currency: "usd".into(),
            poll_interval_secs: 15,
            request_timeout_secs: 10,
            default_price: 3500.0,
            fallback_jitter_pct: 0.02,
            ema_short_period: 5,
            ema_long_period: 20,
            trend_threshold: 0.01,
            api_key_env: None,
        },
        round: RoundConfig {
            tick_interval_ms: 100,
            countdown_secs: 1,
            intermission_secs: 1,
            max_crash_probability: 0.35,
            min_crash_multiplier: 1.05,
        },
        wager: WagerConfig {
            early_exit_penalty: 0.01,
            penalty_free_multiplier: 1.2,
            min_amount: 0.0001,
        },
        autoplay: AutoplayConfig {
            enabled: false,
            amount: 0.05,
            min_threshold: 1.5,
            max_threshold: 3.0,
        },
        dashboard: DashboardConfig {
            enabled: false,
            port: 0,
        },
    }
}

/// Params with the crash draw disabled, for growth-only scenarios.
fn no_crash_params() -> RoundParams {
    RoundParams {
        base_crash_probability: 0.0,
        multiplier_risk_divisor: f64::INFINITY,
        increment_jitter: 0.0,
        ..Default::default()
    }
}

fn started_session(params: RoundParams, seed: u64) -> GameSession {
    let mut session = GameSession::with_parts(&test_config(), params, StdRng::seed_from_u64(seed));
    session.start();
    session
}

fn step_until_flying(session: &mut GameSession) {
    for _ in 0..100 {
        session.step_tick();
        if session.round().is_flying() {
            return;
        }
    }
    panic!("round never launched");
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[test]
fn test_rounds_cycle_and_history_invariants() {
    let mut session = started_session(RoundParams::default(), 42);

    // Feed a couple of live quotes so the EMAs are warm.
    session.apply_quote(Ok(PriceQuote {
        price: 3500.0,
        change_24h_pct: 2.0,
    }));
    session.apply_quote(Ok(PriceQuote {
        price: 3520.0,
        change_24h_pct: 2.1,
    }));

    let mut last_round_id = session.round().id;
    let mut prev_multiplier = session.round().multiplier;
    for _ in 0..50_000 {
        session.step_tick();
        let round = session.round();
        if round.id != last_round_id {
            last_round_id = round.id;
            prev_multiplier = round.multiplier;
        } else if round.is_flying() {
            // Monotone within a round.
            assert!(round.multiplier >= prev_multiplier);
            prev_multiplier = round.multiplier;
        }
        if session.stats().rounds_crashed >= 5 {
            break;
        }
    }

    let stats = session.stats();
    assert!(stats.rounds_crashed >= 5, "stats: {stats}");

    // Every crashed round froze its multiplier above the guard.
    let mut prev_id = 0;
    for summary in session.history() {
        assert!(summary.id > prev_id, "round ids must increase");
        prev_id = summary.id;
        let crash = summary.crash_multiplier.expect("crashed round");
        assert!(crash > 1.05, "crash {crash} at or below the guard");
        assert!((crash - summary.final_multiplier).abs() < 1e-12);
        assert!(summary.ticks > 0);
    }
}

#[test]
fn test_fifty_tick_growth_stays_under_ceiling() {
    // Volatility 0.02, sideways EMAs, no crash draw succeeding. Jitter
    // stays at its default so the ceiling (which allows the full
    // positive jitter every tick) holds strictly.
    let params = RoundParams {
        base_crash_probability: 0.0,
        multiplier_risk_divisor: f64::INFINITY,
        ..Default::default()
    };
    let mut session = started_session(params.clone(), 7);
    session.apply_quote(Ok(PriceQuote {
        price: 3500.0,
        change_24h_pct: 2.0,
    }));
    step_until_flying(&mut session);

    let mut prev = session.round().multiplier;
    for _ in 0..50 {
        session.step_tick();
        let m = session.round().multiplier;
        assert!(m >= prev);
        prev = m;
    }

    let ceiling = 1.0 + 50.0 * params.max_increment(0.02, 0.0);
    assert!(session.round().multiplier > 1.0);
    assert!(session.round().multiplier < ceiling);
}

// ---------------------------------------------------------------------------
// Wager scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_auto_cashout_at_two_without_crash() {
    // Stake 0.05 with auto-cashout 2.00 and no intervening crash.
    let mut session = started_session(no_crash_params(), 11);
    let id = session.place_wager(dec!(0.05), Some(2.0)).unwrap();
    step_until_flying(&mut session);

    let mut payout = None;
    for _ in 0..2_000 {
        for event in session.step_tick() {
            if let RoundEvent::WagerCashedOut { payout: p, .. } = event {
                payout = Some(p);
            }
        }
        if payout.is_some() {
            break;
        }
    }

    // Threshold 2.00 >= 1.2, so no early-exit penalty: exactly 0.10.
    assert_eq!(payout, Some(dec!(0.10)));
    let wager = session.wager(id).unwrap();
    assert_eq!(wager.status, WagerStatus::CashedOut);
    assert_eq!(wager.resolved_at_multiplier, Some(2.0));
}

#[test]
fn test_lost_wager_reaches_exactly_one_terminal_state() {
    let params = RoundParams {
        base_crash_probability: 1.0,
        max_crash_probability: 1.0,
        base_increment: 0.1,
        ..Default::default()
    };
    let mut session = started_session(params, 5);
    let id = session.place_wager(dec!(0.05), None).unwrap();

    for _ in 0..100 {
        session.step_tick();
        if session.wager(id).unwrap().is_resolved() {
            break;
        }
    }

    let wager = session.wager(id).unwrap();
    assert_eq!(wager.status, WagerStatus::Lost);
    assert_eq!(wager.payout, Decimal::ZERO);

    // A late cash-out attempt is rejected, and the status never flips.
    assert!(matches!(
        session.cash_out(id).unwrap_err(),
        GameError::NotActive(_)
    ));
    assert_eq!(session.wager(id).unwrap().status, WagerStatus::Lost);
    assert_eq!(session.stats().wagers_lost, 1);
    assert_eq!(session.stats().wagers_cashed_out, 0);
}

#[test]
fn test_wager_rejections_leave_no_state() {
    let mut session = started_session(RoundParams::default(), 3);

    assert!(matches!(
        session.place_wager(Decimal::ZERO, None).unwrap_err(),
        GameError::InvalidAmount(_)
    ));
    assert!(matches!(
        session.place_wager(dec!(0.05), Some(0.5)).unwrap_err(),
        GameError::InvalidThreshold(_)
    ));
    assert_eq!(session.stats().wagers_placed, 0);
    assert_eq!(session.stats().total_staked, Decimal::ZERO);
}

// ---------------------------------------------------------------------------
// Feed failure handling
// ---------------------------------------------------------------------------

#[test]
fn test_fetch_failure_switches_to_fallback_within_bound() {
    let cfg = test_config();
    let mut session = started_session(RoundParams::default(), 9);

    session.apply_quote(Ok(PriceQuote {
        price: 3500.0,
        change_24h_pct: 1.0,
    }));
    let prev = session.adapter().latest().price;

    session.apply_quote(Err(anyhow!("fetch() threw")));

    let signal = session.adapter().latest();
    assert_eq!(signal.source, SignalSource::Fallback);
    assert!(signal.price.is_finite() && signal.price > 0.0);
    assert!((signal.price - prev).abs() <= prev * cfg.market.fallback_jitter_pct + 1e-9);

    // Gameplay continues on the synthesized signal.
    step_until_flying(&mut session);
    session.step_tick();
    assert!(session.round().multiplier > 1.0);
}

#[tokio::test]
async fn test_poller_feeds_session_through_failures() {
    let feed = MockFeed::new(PriceQuote {
        price: 3500.0,
        change_24h_pct: 1.0,
    });
    feed.push_quote(PriceQuote {
        price: 3510.0,
        change_24h_pct: 1.2,
    });

    let (handle, mut rx) = spawn_poller(Box::new(feed.clone()), Duration::from_millis(10));
    let mut session = started_session(RoundParams::default(), 13);

    // First delivery is a live quote.
    let outcome = rx.recv().await.expect("poller alive");
    session.apply_quote(outcome);
    assert!(session.adapter().latest().is_live());
    assert_eq!(session.adapter().latest().price, 3510.0);

    // Break the feed: the session degrades to fallback but the reading
    // stays usable. A fetch may already be in flight, so drain until the
    // failure arrives.
    feed.set_error("connection reset");
    for _ in 0..10 {
        let outcome = rx.recv().await.expect("poller alive");
        let failed = outcome.is_err();
        session.apply_quote(outcome);
        if failed {
            break;
        }
    }
    assert!(session.adapter().degraded());
    assert!(session.adapter().latest().is_usable());

    // Recovery: the next successful poll flips the source back to live.
    feed.clear_error();
    for _ in 0..10 {
        let outcome = rx.recv().await.expect("poller alive");
        let ok = outcome.is_ok();
        session.apply_quote(outcome);
        if ok {
            break;
        }
    }
    assert!(session.adapter().latest().is_live());

    handle.abort();
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn test_session_record_roundtrip_continues_ids() {
    let params = RoundParams {
        base_crash_probability: 1.0,
        max_crash_probability: 1.0,
        base_increment: 0.1,
        ..Default::default()
    };
    let mut session = started_session(params.clone(), 21);
    for _ in 0..200 {
        session.step_tick();
        if session.stats().rounds_crashed >= 3 {
            break;
        }
    }
    let played = session.stats().rounds_played;
    assert!(played >= 3);

    let path = {
        let mut p = std::env::temp_dir();
        p.push(format!("blockflight_sim_{}.json", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    };
    let record = SessionRecord::new(
        session.stats().clone(),
        session.history().cloned().collect(),
    );
    storage::save_record(&record, Some(&path)).unwrap();

    let loaded = storage::load_record(Some(&path)).unwrap().unwrap();
    let mut resumed =
        GameSession::with_parts(&test_config(), params, StdRng::seed_from_u64(22));
    resumed.restore(loaded.stats, loaded.recent_rounds);
    resumed.start();

    let last_id = session.history().last().unwrap().id;
    assert_eq!(resumed.round().id, last_id + 1);
    assert_eq!(resumed.stats().rounds_played, played);

    storage::delete_record(Some(&path)).unwrap();
}
