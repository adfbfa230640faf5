//! One-second tick source for timer sub-mode sessions.
//!
//! A `Ticker` is a thread that feeds `EngineEvent::Tick` into the
//! engine's inbound event queue once per elapsed second until cancelled.
//! The engine owns at most one ticker at a time; starting a new timer
//! cancels the old ticker first. Each tick carries the generation the
//! ticker was spawned with, so a tick already in flight when its ticker
//! is cancelled is discarded by the engine instead of driving a stale
//! session.

use crate::EngineEvent;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to a running tick thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Ticker {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Spawn a tick thread sending `Tick { generation }` every second.
    pub fn spawn(events_tx: Sender<EngineEvent>, generation: u64) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::spawn(move || loop {
            match stop_rx.recv_timeout(Duration::from_secs(1)) {
                // Cancelled, or the handle was dropped without cancel
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if events_tx.send(EngineEvent::Tick { generation }).is_err() {
                        // Event queue is gone; nothing left to tick for
                        break;
                    }
                }
            }
        });

        tracing::debug!("Started ticker (generation {})", generation);
        Self {
            stop_tx,
            handle: Some(handle),
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
