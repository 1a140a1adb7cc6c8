//! BLOCKFLIGHT — Market-Driven Crash Round Simulator
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores history from disk (or starts fresh), and drives the session
//! from a single select! loop: tick stepping, feed poll events, and
//! graceful shutdown.

use anyhow::Result;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use blockflight::config;
use blockflight::dashboard::{self, routes::DashboardState};
use blockflight::engine::session::{GameSession, RoundEvent};
use blockflight::market::coingecko::CoinGeckoFeed;
use blockflight::market::poller::spawn_poller;
use blockflight::storage::{self, SessionRecord};

const BANNER: &str = r#"
 ____  _     ___   ____ _  _______ _     ___ ____ _   _ _____
| __ )| |   / _ \ / ___| |/ /  ___| |   |_ _/ ___| | | |_   _|
|  _ \| |  | | | | |   | ' /| |_  | |    | | |  _| |_| | | |
| |_) | |__| |_| | |___| . \|  _| | |___ | | |_| |  _  | | |
|____/|_____\___/ \____|_|\_\_|   |_____|___\____|_| |_| |_|

  Market-Driven Crash Round Simulator
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        session = %cfg.session.name,
        asset = %cfg.market.asset_id,
        tick_interval_ms = cfg.round.tick_interval_ms,
        poll_interval_secs = cfg.market.poll_interval_secs,
        "BLOCKFLIGHT starting up"
    );

    // -- Restore or create session ----------------------------------------

    let mut session = GameSession::new(&cfg);
    match storage::load_record(Some(&cfg.session.state_file))? {
        Some(record) => {
            info!(
                rounds_played = record.stats.rounds_played,
                recent_rounds = record.recent_rounds.len(),
                "Resumed from saved state"
            );
            session.restore(record.stats, record.recent_rounds);
        }
        None => info!("Fresh start"),
    }

    // -- Price feed poller -------------------------------------------------

    let api_key = cfg
        .market
        .api_key_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    if api_key.is_none() {
        debug!("No CoinGecko API key configured — using keyless access");
    }

    let feed = CoinGeckoFeed::new(
        &cfg.market.asset_id,
        &cfg.market.vs_currency,
        Duration::from_secs(cfg.market.request_timeout_secs),
        api_key,
    )?;
    let (poller_handle, mut poll_rx) = spawn_poller(
        Box::new(feed),
        Duration::from_secs(cfg.market.poll_interval_secs),
    );

    // -- Dashboard ---------------------------------------------------------

    session.start();

    let dash = if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(session.snapshot()));
        dashboard::spawn_dashboard(state.clone(), cfg.dashboard.port)?;
        Some(state)
    } else {
        None
    };

    // -- Main loop ---------------------------------------------------------

    let autoplay_amount = Decimal::from_f64(cfg.autoplay.amount).unwrap_or_default();
    let mut autoplay_rng = rand::rng();

    let mut ticker =
        tokio::time::interval(Duration::from_millis(cfg.round.tick_interval_ms.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = session.step_tick();
                let mut round_finished = false;
                let mut wagers_resolved = false;

                for event in &events {
                    match event {
                        RoundEvent::Launched { round_id } => {
                            if cfg.autoplay.enabled && autoplay_amount > Decimal::ZERO {
                                let threshold = autoplay_rng
                                    .random_range(cfg.autoplay.min_threshold..=cfg.autoplay.max_threshold);
                                match session.place_wager(autoplay_amount, Some(threshold)) {
                                    Ok(wager_id) => debug!(
                                        %wager_id,
                                        round_id,
                                        threshold = format!("{threshold:.2}"),
                                        "Autoplay wager placed"
                                    ),
                                    Err(e) => warn!(error = %e, "Autoplay wager rejected"),
                                }
                            }
                        }
                        RoundEvent::Ticked { multiplier, crash_probability, .. } => {
                            debug!(
                                multiplier = format!("{multiplier:.4}"),
                                risk = format!("{:.1}%", crash_probability * 100.0),
                                "Tick"
                            );
                        }
                        RoundEvent::WagerCashedOut { .. } => wagers_resolved = true,
                        RoundEvent::Crashed { .. } | RoundEvent::Retired { .. } => {
                            round_finished = true;
                            wagers_resolved = true;
                        }
                        RoundEvent::RoundCreated { round_id } => {
                            debug!(round_id, "New round created");
                        }
                    }
                }

                if round_finished {
                    if let Err(e) = persist(&session, &cfg.session.state_file) {
                        error!(error = %e, "Failed to save state");
                    }
                }

                if let Some(dash) = &dash {
                    *dash.snapshot.write().await = session.snapshot();
                    if round_finished {
                        *dash.rounds.write().await = session.history().cloned().collect();
                    }
                    if wagers_resolved {
                        *dash.wagers.write().await = session.recent_resolved_wagers(100);
                    }
                }
            }
            Some(outcome) = poll_rx.recv() => {
                session.apply_quote(outcome);
                let latest = session.adapter().latest().clone();
                debug!(signal = %latest, "Signal refreshed");
                if let Some(dash) = &dash {
                    let mut signals = dash.signals.write().await;
                    if signals.len() >= 120 {
                        signals.remove(0);
                    }
                    signals.push(latest);
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    // Tear down: stop ticking, abort the poller exactly once, persist.
    session.stop();
    poller_handle.abort();
    persist(&session, &cfg.session.state_file)?;
    info!(stats = %session.stats(), "BLOCKFLIGHT shut down cleanly.");

    Ok(())
}

/// Write the current stats and round history to the state file.
fn persist(session: &GameSession, path: &str) -> Result<()> {
    let record = SessionRecord::new(
        session.stats().clone(),
        session.history().cloned().collect(),
    );
    storage::save_record(&record, Some(path))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("blockflight=info"));

    let json_logging = std::env::var("BLOCKFLIGHT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
