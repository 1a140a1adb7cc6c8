//! Persistence layer.
//!
//! Saves and loads the session record (stats + recent rounds) to/from a
//! JSON file — the systems-side equivalent of the original's bare
//! key-value storage. No schema versioning; a missing file means a
//! fresh start.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::types::{RoundSummary, SessionStats};

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "blockflight_state.json";

/// Everything persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub stats: SessionStats,
    pub recent_rounds: Vec<RoundSummary>,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(stats: SessionStats, recent_rounds: Vec<RoundSummary>) -> Self {
        Self {
            stats,
            recent_rounds,
            saved_at: Utc::now(),
        }
    }
}

/// Save the session record to a JSON file.
pub fn save_record(record: &SessionRecord, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(record)
        .context("Failed to serialise session record")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write state to {path}"))?;

    debug!(path, rounds = record.recent_rounds.len(), "State saved");
    Ok(())
}

/// Load the session record from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_record(path: Option<&str>) -> Result<Option<SessionRecord>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read state from {path}"))?;

    let record: SessionRecord = serde_json::from_str(&json)
        .context(format!("Failed to parse state from {path}"))?;

    info!(
        path,
        rounds_played = record.stats.rounds_played,
        recent_rounds = record.recent_rounds.len(),
        "State loaded from disk"
    );

    Ok(Some(record))
}

/// Delete the state file (for testing or reset).
pub fn delete_record(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
