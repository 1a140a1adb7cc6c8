//! Mock price feed for integration testing.
//!
//! Provides a deterministic `PriceFeed` implementation that returns
//! scripted quotes and can be switched into a failing state — all
//! in-memory with no external dependencies. Clones share state, so a
//! test can keep a handle while the poller owns the feed.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use blockflight::market::{PriceFeed, PriceQuote};

/// A scripted price feed for deterministic testing.
///
/// Quotes are served in FIFO order; once the script is exhausted the
/// last quote repeats. While a forced error is set, every fetch fails.
#[derive(Clone)]
pub struct MockFeed {
    script: Arc<Mutex<VecDeque<PriceQuote>>>,
    last: Arc<Mutex<PriceQuote>>,
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockFeed {
    pub fn new(initial: PriceQuote) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(initial)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue a quote to be served by a future fetch.
    pub fn push_quote(&self, quote: PriceQuote) {
        self.script.lock().unwrap().push_back(quote);
    }

    /// Force all subsequent fetches to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl PriceFeed for MockFeed {
    async fn fetch_quote(&self) -> Result<PriceQuote> {
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!("{msg}"));
        }
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            *last = next;
        }
        Ok(*last)
    }

    fn source_name(&self) -> &str {
        "mock"
    }
}
