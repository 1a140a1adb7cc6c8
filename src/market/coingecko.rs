//! CoinGecko spot-price feed.
//!
//! API: `https://api.coingecko.com/api/v3/simple/price`
//! Auth: none required; demo API keys raise the rate limit and are passed
//! via the `x-cg-demo-api-key` header. Rate limit: ~30 req/min keyless.
//!
//! The response is a nested map keyed by asset id then by quote currency,
//! with the 24h change under `<currency>_24h_change`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{PriceFeed, PriceQuote};

const API_BASE: &str = "https://api.coingecko.com/api/v3/simple/price";

/// Nested payload: asset id -> { "usd": 3512.4, "usd_24h_change": -1.2 }.
type SimplePriceResponse = HashMap<String, HashMap<String, f64>>;

pub struct CoinGeckoFeed {
    http: Client,
    asset_id: String,
    vs_currency: String,
    api_key: Option<String>,
}

impl CoinGeckoFeed {
    pub fn new(
        asset_id: &str,
        vs_currency: &str,
        timeout: Duration,
        api_key: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("BLOCKFLIGHT/0.1.0")
            .build()
            .context("Failed to build CoinGecko HTTP client")?;
        Ok(Self {
            http,
            asset_id: asset_id.to_string(),
            vs_currency: vs_currency.to_lowercase(),
            api_key,
        })
    }

    /// Build the simple/price request URL for the configured asset.
    fn build_url(&self) -> String {
        format!(
            "{API_BASE}?ids={}&vs_currencies={}&include_24hr_change=true",
            urlencoding::encode(&self.asset_id),
            urlencoding::encode(&self.vs_currency),
        )
    }

    /// Extract a quote from the nested response map.
    fn parse_quote(
        payload: &SimplePriceResponse,
        asset_id: &str,
        vs_currency: &str,
    ) -> Result<PriceQuote> {
        let asset = payload
            .get(asset_id)
            .with_context(|| format!("Asset missing from response: {asset_id}"))?;

        let price = *asset
            .get(vs_currency)
            .with_context(|| format!("Price missing for currency: {vs_currency}"))?;

        let change_key = format!("{vs_currency}_24h_change");
        let change_24h_pct = *asset
            .get(&change_key)
            .with_context(|| format!("24h change missing: {change_key}"))?;

        if !price.is_finite() || price <= 0.0 {
            anyhow::bail!("Unusable price in response: {price}");
        }

        Ok(PriceQuote {
            price,
            change_24h_pct,
        })
    }
}

#[async_trait]
impl PriceFeed for CoinGeckoFeed {
    async fn fetch_quote(&self) -> Result<PriceQuote> {
        let url = self.build_url();

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header("x-cg-demo-api-key", key);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("CoinGecko request failed for {}", self.asset_id))?;

        if !resp.status().is_success() {
            let status = resp.status();
            anyhow::bail!("CoinGecko API error for {}: {status}", self.asset_id);
        }

        let payload: SimplePriceResponse = resp
            .json()
            .await
            .context("Failed to parse CoinGecko response")?;

        let quote = Self::parse_quote(&payload, &self.asset_id, &self.vs_currency)?;
        debug!(
            asset = %self.asset_id,
            price = quote.price,
            change_24h = quote.change_24h_pct,
            "Quote fetched"
        );
        Ok(quote)
    }

    fn source_name(&self) -> &str {
        "coingecko"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
