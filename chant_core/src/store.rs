//! Persistent store for counter state, settings, and history.
//!
//! The store is an explicit state container: loaded from durable storage
//! once at session start, saved atomically on every mutation, and handed
//! to the engine by value. Every `set_*`/`log_history` call is durable
//! before it returns, so the engine can treat each mutation as committed
//! before the next event is processed.

use crate::{CounterState, Error, HistoryLedger, Mode, Result, Settings, StoreState};
use chrono::NaiveDate;
use fs2::FileExt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Durable container for the named state slices (`voice`, `silent`,
/// `settings`, `history`).
#[derive(Debug)]
pub struct PersistentStore {
    state: StoreState,
    path: Option<PathBuf>,
}

impl PersistentStore {
    /// Open a store backed by a file, loading existing state.
    ///
    /// A missing file yields default state. A corrupted or unreadable
    /// file logs a warning and yields default state rather than failing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = load_state(&path)?;
        Ok(Self {
            state,
            path: Some(path),
        })
    }

    /// A store with no backing file; mutations stay in memory.
    pub fn in_memory() -> Self {
        Self {
            state: StoreState::default(),
            path: None,
        }
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn counter(&self, mode: Mode) -> &CounterState {
        match mode {
            Mode::Voice => &self.state.voice,
            Mode::Silent => &self.state.silent,
        }
    }

    /// Replace a counter slice and persist.
    pub fn set_counter(&mut self, mode: Mode, counter: CounterState) -> Result<()> {
        match mode {
            Mode::Voice => self.state.voice = counter,
            Mode::Silent => self.state.silent = counter,
        }
        self.save()
    }

    pub fn settings(&self) -> &Settings {
        &self.state.settings
    }

    pub fn set_settings(&mut self, settings: Settings) -> Result<()> {
        self.state.settings = settings;
        self.save()
    }

    /// Append to today's ledger entry for the given mode and persist.
    ///
    /// The day's entry is created lazily on its first increment.
    pub fn log_history(&mut self, mode: Mode, amount: u64) -> Result<()> {
        self.log_history_at(chrono::Local::now().date_naive(), mode, amount)
    }

    /// Append to a specific day's ledger entry and persist.
    pub fn log_history_at(&mut self, date: NaiveDate, mode: Mode, amount: u64) -> Result<()> {
        let entry = self.state.history.entry(date).or_default();
        *entry.for_mode_mut(mode) += amount;
        self.save()
    }

    pub fn history(&self) -> &HistoryLedger {
        &self.state.history
    }

    /// Lifetime total: sum of voice + silent over all ledger days.
    pub fn total_count(&self) -> u64 {
        self.state.history.values().map(|day| day.total()).sum()
    }

    /// Write the state to the backing file, if any.
    ///
    /// Atomic: write to a temp file in the same directory, fsync, then
    /// rename over the original.
    fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(p) => p,
            None => return Ok(()),
        };

        let parent = path
            .parent()
            .ok_or_else(|| Error::Store(format!("store path {:?} has no parent directory", path)))?;
        std::fs::create_dir_all(parent)?;

        let temp = NamedTempFile::new_in(parent)?;

        // Exclusive lock on the temp file serializes concurrent writers
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(&self.state)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;

        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved store state to {:?}", path);
        Ok(())
    }
}

/// Load store state from a file with shared locking.
fn load_state(path: &Path) -> Result<StoreState> {
    if !path.exists() {
        tracing::info!("No store file found, using default state");
        return Ok(StoreState::default());
    }

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("Unable to open store file {:?}: {}. Using defaults.", path, e);
            return Ok(StoreState::default());
        }
    };

    if let Err(e) = file.lock_shared() {
        tracing::warn!("Unable to lock store file {:?}: {}. Using defaults.", path, e);
        return Ok(StoreState::default());
    }

    let mut contents = String::new();
    let mut reader = std::io::BufReader::new(&file);
    if let Err(e) = reader.read_to_string(&mut contents) {
        let _ = file.unlock();
        tracing::warn!("Failed to read store file {:?}: {}. Using defaults.", path, e);
        return Ok(StoreState::default());
    }

    file.unlock()?;

    match serde_json::from_str::<StoreState>(&contents) {
        Ok(state) => {
            tracing::debug!("Loaded store state from {:?}", path);
            Ok(state)
        }
        Err(e) => {
            tracing::warn!("Failed to parse store file {:?}: {}. Using defaults.", path, e);
            Ok(StoreState::default())
        }
    }
}
