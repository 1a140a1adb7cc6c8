//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`
//! and mirrored from the main loop after each tick.

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::session::SessionSnapshot;
use crate::types::{MarketSignal, RoundSummary, Wager};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub snapshot: RwLock<SessionSnapshot>,
    pub rounds: RwLock<Vec<RoundSummary>>,
    pub signals: RwLock<Vec<MarketSignal>>,
    pub wagers: RwLock<Vec<Wager>>,
}

impl DashboardState {
    pub fn new(initial: SessionSnapshot) -> Self {
        let first_signal = initial.signal.clone();
        Self {
            snapshot: RwLock::new(initial),
            rounds: RwLock::new(Vec::new()),
            signals: RwLock::new(vec![first_signal]),
            wagers: RwLock::new(Vec::new()),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.snapshot.read().await.clone())
}

/// GET /api/rounds
pub async fn get_rounds(State(state): State<AppState>) -> Json<Vec<RoundSummary>> {
    let rounds = state.rounds.read().await;
    // Return last 100 rounds
    let start = rounds.len().saturating_sub(100);
    Json(rounds[start..].to_vec())
}

/// GET /api/signals
pub async fn get_signals(State(state): State<AppState>) -> Json<Vec<MarketSignal>> {
    Json(state.signals.read().await.clone())
}

/// GET /api/wagers
pub async fn get_wagers(State(state): State<AppState>) -> Json<Vec<Wager>> {
    let wagers = state.wagers.read().await;
    let start = wagers.len().saturating_sub(100);
    Json(wagers[start..].to_vec())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
