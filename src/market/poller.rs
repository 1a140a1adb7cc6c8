//! Background price poller.
//!
//! Fetches quotes on a fixed interval and pushes the raw outcomes into a
//! channel. The tick loop drains the channel and never awaits the network
//! itself; the poll task is the only place a fetch is in flight.
//!
//! The returned handle must be aborted exactly once on teardown.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::{PriceFeed, PriceQuote};

/// Buffered poll outcomes; small since the consumer drains every tick.
const CHANNEL_CAPACITY: usize = 8;

/// Spawn the poll task for the given feed.
///
/// The first fetch fires immediately, then every `interval`. The task
/// exits on its own when the receiver is dropped.
pub fn spawn_poller(
    feed: Box<dyn PriceFeed>,
    interval: Duration,
) -> (JoinHandle<()>, mpsc::Receiver<Result<PriceQuote>>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

    let handle = tokio::spawn(async move {
        info!(
            source = feed.source_name(),
            interval_secs = interval.as_secs(),
            "Price poller started"
        );
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let outcome = feed.fetch_quote().await;
            if tx.send(outcome).await.is_err() {
                // Receiver gone: session torn down.
                break;
            }
        }
    });

    (handle, rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
