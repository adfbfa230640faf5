//! Core domain types for the chant counting system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Counting modes and sub-modes
//! - Counter state and settings
//! - The persisted store shape and history ledger
//! - Engine events and notifications

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Counting Modes
// ============================================================================

/// Top-level counting context: speech-detected or manual.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Voice,
    Silent,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Voice => "voice",
            Mode::Silent => "silent",
        }
    }
}

/// Counting discipline within a mode.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubMode {
    /// Ascending tally with no goal
    #[default]
    Up,
    /// Descending from a target; completes at zero
    Down,
    /// Ascending, but only while a timer session runs
    Timer,
}

/// Whether ambient chanting audio accompanies voice counting.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccompanimentStyle {
    #[default]
    Free,
    Follow,
}

/// Accompaniment selection for the voice counter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accompaniment {
    pub style: AccompanimentStyle,
    pub track: String,
}

impl Default for Accompaniment {
    fn default() -> Self {
        Self {
            style: AccompanimentStyle::Free,
            track: "track1".into(),
        }
    }
}

// ============================================================================
// Counter State and Settings
// ============================================================================

/// Per-mode counter state. One instance each for voice and silent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterState {
    #[serde(default)]
    pub count: u64,

    #[serde(default)]
    pub sub_mode: SubMode,

    /// Goal for `down` sub-mode
    #[serde(default = "default_target")]
    pub target: u64,

    /// Configured duration for `timer` sub-mode, in minutes
    #[serde(default = "default_timer_duration")]
    pub timer_duration: u64,

    /// Voice counter only; silent counters leave this unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accompaniment: Option<Accompaniment>,
}

impl Default for CounterState {
    fn default() -> Self {
        Self {
            count: 0,
            sub_mode: SubMode::Up,
            target: default_target(),
            timer_duration: default_timer_duration(),
            accompaniment: None,
        }
    }
}

impl CounterState {
    /// Default state for the voice counter, with accompaniment selection.
    pub fn voice_default() -> Self {
        Self {
            accompaniment: Some(Accompaniment::default()),
            ..Self::default()
        }
    }
}

/// User-adjustable reminder settings.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub reminder_enabled: bool,

    #[serde(default = "default_reminder_interval")]
    pub reminder_interval: u64,

    #[serde(default = "default_reminder_sound")]
    pub reminder_sound: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            reminder_enabled: false,
            reminder_interval: default_reminder_interval(),
            reminder_sound: default_reminder_sound(),
        }
    }
}

fn default_target() -> u64 {
    108
}

fn default_timer_duration() -> u64 {
    30
}

fn default_reminder_interval() -> u64 {
    1000
}

fn default_reminder_sound() -> String {
    "bell".into()
}

// ============================================================================
// History Ledger
// ============================================================================

/// Counts completed on a single calendar day.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DayTally {
    #[serde(default)]
    pub voice: u64,
    #[serde(default)]
    pub silent: u64,
}

impl DayTally {
    pub fn total(&self) -> u64 {
        self.voice + self.silent
    }

    pub fn for_mode(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Voice => self.voice,
            Mode::Silent => self.silent,
        }
    }

    pub fn for_mode_mut(&mut self, mode: Mode) -> &mut u64 {
        match mode {
            Mode::Voice => &mut self.voice,
            Mode::Silent => &mut self.silent,
        }
    }
}

/// Append-only per-day history, keyed by calendar date.
///
/// `NaiveDate` keys serialize as ISO `YYYY-MM-DD`, the on-disk shape the
/// ledger must round-trip.
pub type HistoryLedger = BTreeMap<NaiveDate, DayTally>;

// ============================================================================
// Persisted Store Shape
// ============================================================================

/// The complete persisted state: both counters, settings, and history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreState {
    pub voice: CounterState,
    pub silent: CounterState,
    #[serde(default)]
    pub settings: Settings,
    /// Absent on load means an empty ledger, not an error
    #[serde(default)]
    pub history: HistoryLedger,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            voice: CounterState::voice_default(),
            silent: CounterState::default(),
            settings: Settings::default(),
            history: HistoryLedger::new(),
        }
    }
}

// ============================================================================
// Engine Events and Notifications
// ============================================================================

/// Cause of a session-ending or interval notification.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    TargetReached,
    TimerEnded,
    IntervalReached,
}

/// Inbound events, delivered to the engine one at a time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    SetMode(Mode),
    Increment,
    Reset,
    /// Duration in seconds
    StartTimer(u64),
    StopTimer,
    /// One elapsed second from a ticker thread. Ticks from a cancelled
    /// ticker carry a stale generation and are discarded.
    Tick { generation: u64 },
}

/// Outbound notifications, emitted inline as operations apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The active counter's tally changed
    CountChanged(u64),
    /// One timer second elapsed; payload is the remaining seconds
    TimerTick(u64),
    Complete(CompletionReason),
    /// Lifetime total crossed a fixed threshold exactly
    Milestone(u64),
}
