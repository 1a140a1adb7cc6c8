//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub market: MarketConfig,
    pub round: RoundConfig,
    pub wager: WagerConfig,
    pub autoplay: AutoplayConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    pub name: String,
    /// Completed rounds retained in memory and on disk.
    pub history_limit: usize,
    pub state_file: String,
    /// Env var holding a fixed RNG seed (unset = entropy-seeded).
    #[serde(default)]
    pub rng_seed_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MarketConfig {
    /// CoinGecko asset id, e.g. "ethereum".
    pub asset_id: String,
    /// Quote currency, e.g. "usd".
    pub vs_currency: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Price the adapter is seeded with before the first fetch.
    pub default_price: f64,
    /// Max relative price move per synthesized fallback sample.
    pub fallback_jitter_pct: f64,
    pub ema_short_period: u32,
    pub ema_long_period: u32,
    /// Relative EMA band outside which the trend reads bullish/bearish.
    pub trend_threshold: f64,
    /// Env var holding an optional CoinGecko demo API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoundConfig {
    pub tick_interval_ms: u64,
    pub countdown_secs: u64,
    /// Pause between a crash and the next round's countdown.
    pub intermission_secs: u64,
    pub max_crash_probability: f64,
    pub min_crash_multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WagerConfig {
    /// Penalty fraction applied to cash-outs below the penalty-free line.
    pub early_exit_penalty: f64,
    pub penalty_free_multiplier: f64,
    pub min_amount: f64,
}

/// Spectator-mode wagers placed automatically each round, so an idle
/// simulator still exercises the full wager lifecycle.
#[derive(Debug, Deserialize, Clone)]
pub struct AutoplayConfig {
    pub enabled: bool,
    pub amount: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
