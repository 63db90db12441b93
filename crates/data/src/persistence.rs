//! Portfolio state persistence for surviving restarts.
//!
//! The state is a single versioned JSON snapshot. Saving writes to a
//! temporary file in the same directory and renames it into place, so
//! a crash mid-save never leaves a truncated snapshot readable by
//! `load`. A missing file is the "no prior state" sentinel, not an
//! error; a corrupt file or unknown schema version is surfaced
//! explicitly rather than silently replaced with a fresh state.

use chrono::{DateTime, Utc};
use rotator_core::portfolio::{PortfolioState, Position};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

const SCHEMA_VERSION: u32 = 1;

/// Errors from state persistence operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// IO error reading/writing the snapshot file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The snapshot was written by an unknown schema version.
    #[error("unsupported snapshot schema version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
}

/// The on-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    pub allocations: BTreeMap<String, f64>,
    pub entry_prices: BTreeMap<String, f64>,
    pub all_time_high: f64,
    /// `None` until a first total value has been observed; JSON has no
    /// representation for the in-memory `f64::INFINITY` sentinel.
    pub all_time_low: Option<f64>,
    pub saved_at: DateTime<Utc>,
}

impl PersistedState {
    /// Builds a snapshot from live portfolio state.
    #[must_use]
    pub fn from_state(state: &PortfolioState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            allocations: state
                .positions
                .iter()
                .map(|(s, p)| (s.clone(), p.allocation))
                .collect(),
            entry_prices: state
                .positions
                .iter()
                .map(|(s, p)| (s.clone(), p.entry_price))
                .collect(),
            all_time_high: state.all_time_high,
            all_time_low: state
                .all_time_low
                .is_finite()
                .then_some(state.all_time_low),
            saved_at: Utc::now(),
        }
    }

    /// Converts back to live portfolio state.
    #[must_use]
    pub fn into_state(self) -> PortfolioState {
        let mut positions = BTreeMap::new();
        for (symbol, allocation) in self.allocations {
            // A symbol missing from entry_prices would mean a snapshot
            // written outside this module; treat its entry as 0 and
            // let the strategy's guards reject it.
            let entry = self.entry_prices.get(&symbol).copied().unwrap_or(0.0);
            positions.insert(symbol, Position::new(allocation, entry));
        }
        PortfolioState {
            positions,
            all_time_high: self.all_time_high,
            all_time_low: self.all_time_low.unwrap_or(f64::INFINITY),
        }
    }
}

/// Handles saving and restoring portfolio state.
#[derive(Debug, Clone)]
pub struct StatePersistence {
    path: PathBuf,
}

impl StatePersistence {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Saves the portfolio state, replacing any prior snapshot.
    ///
    /// Writes to `<path>.tmp` and renames into place. The rename is
    /// atomic on the same filesystem, so the prior snapshot stays
    /// intact if the write fails or the process dies mid-save.
    ///
    /// # Errors
    /// Returns [`PersistenceError`] if the write fails; the previous
    /// snapshot is untouched in that case.
    pub fn save(&self, state: &PortfolioState) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let persisted = PersistedState::from_state(state);
        {
            let file = File::create(&tmp_path)?;
            let writer = BufWriter::new(file);
            serde_json::to_writer_pretty(writer, &persisted)?;
        }
        fs::rename(&tmp_path, &self.path)?;

        debug!(
            path = %self.path.display(),
            positions = state.positions.len(),
            "Saved portfolio state"
        );

        Ok(())
    }

    /// Loads the last saved portfolio state.
    ///
    /// # Returns
    /// - `Ok(Some(state))` when a snapshot exists and parses.
    /// - `Ok(None)` when no snapshot exists (first run, or the file
    ///   was deleted externally) — the caller performs the initial
    ///   allocation instead of resuming.
    ///
    /// # Errors
    /// A corrupt file or an unknown schema version is an error, never
    /// a silent fresh start.
    pub fn load(&self) -> Result<Option<PortfolioState>, PersistenceError> {
        if !self.path.exists() {
            info!(
                path = %self.path.display(),
                "No persisted state found, starting fresh"
            );
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let persisted: PersistedState = serde_json::from_reader(reader)?;

        if persisted.schema_version != SCHEMA_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: persisted.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        info!(
            path = %self.path.display(),
            positions = persisted.allocations.len(),
            saved_at = %persisted.saved_at,
            "Loaded persisted state"
        );

        Ok(Some(persisted.into_state()))
    }
}
