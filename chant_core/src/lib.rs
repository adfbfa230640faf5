#![forbid(unsafe_code)]

//! Core domain model and session logic for the chant counting companion.
//!
//! This crate provides:
//! - Domain types (modes, counter state, settings, history ledger)
//! - The counting engine state machine and its timer subsystem
//! - Milestone and reminder evaluation
//! - The phrase-recognition adapter
//! - Persistence (atomic JSON store) and history statistics

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod store;
pub mod engine;
pub mod timer;
pub mod milestone;
pub mod recognition;
pub mod history;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::PersistentStore;
pub use engine::CountingEngine;
pub use timer::Ticker;
pub use milestone::MILESTONES;
pub use recognition::{
    BackendError, BackendSignal, PhraseRecognizer, RecognitionEvent, SpeechBackend,
};
pub use history::{summarize, RangeSummary, StatsRange};
